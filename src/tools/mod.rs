//! Tool executor: the backend operations the completion service may call mid-conversation.

pub mod catalog;
mod internal;

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::{MarketDataProvider, ToolSpec};

pub use catalog::TOOL_CATALOG_VERSION;

fn default_period() -> String {
    "1mo".to_string()
}

fn default_interval() -> String {
    "1d".to_string()
}

/// A decoded, schema-checked tool call.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "name", content = "arguments", rename_all = "snake_case")]
pub enum ToolInvocation {
    GetStockQuote {
        symbol: String,
    },
    GetPriceHistory {
        symbol: String,
        #[serde(default = "default_period")]
        period: String,
        #[serde(default = "default_interval")]
        interval: String,
    },
    GetCompanyInfo {
        symbol: String,
    },
    GetSectorPerformance {},
    GetFinancialPlans {},
    GetUserMemory {},
    SaveUserMemory {
        key: String,
        value: String,
    },
    GetActiveAlerts {},
    GetUsageSummary {},
    GetPendingInsights {},
}

impl ToolInvocation {
    /// Decodes arguments for a catalog tool. A missing argument object counts as empty.
    pub fn decode(name: &str, input: &Value) -> Result<Self> {
        let arguments = match input {
            Value::Null => json!({}),
            other => other.clone(),
        };
        let invocation: ToolInvocation =
            serde_json::from_value(json!({ "name": name, "arguments": arguments })).map_err(
                |e| WealthWiseError::InvalidToolArguments {
                    tool: name.to_string(),
                    reason: e.to_string(),
                },
            )?;
        invocation.validate(name)?;
        Ok(invocation)
    }

    fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: &str| WealthWiseError::InvalidToolArguments {
            tool: name.to_string(),
            reason: reason.to_string(),
        };
        match self {
            ToolInvocation::GetStockQuote { symbol }
            | ToolInvocation::GetPriceHistory { symbol, .. }
            | ToolInvocation::GetCompanyInfo { symbol } => {
                if symbol.trim().is_empty() {
                    return Err(invalid("symbol must not be empty"));
                }
            }
            ToolInvocation::SaveUserMemory { key, value } => {
                if key.trim().is_empty() || value.trim().is_empty() {
                    return Err(invalid("key and value must not be empty"));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// User scope for tools that touch stored state.
#[derive(Clone)]
pub struct ToolContext {
    pub db: Database,
    pub user_id: i32,
}

impl ToolContext {
    pub fn new(db: Database, user_id: i32) -> Self {
        Self { db, user_id }
    }
}

pub struct ToolExecutor {
    market: Arc<dyn MarketDataProvider>,
}

impl ToolExecutor {
    pub fn new(market: Arc<dyn MarketDataProvider>) -> Self {
        Self { market }
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        catalog::all_tools()
    }

    /// Runs one tool call and returns its JSON-encoded result.
    ///
    /// Unknown tools and failures inside a tool come back as `{"error": ...}` payloads.
    /// Only arguments that cannot be decoded for a known tool are returned as `Err`.
    pub async fn execute(&self, name: &str, input: &Value, ctx: Option<&ToolContext>) -> Result<String> {
        if !catalog::is_known(name) {
            warn!(tool = name, "Unknown tool requested");
            return Ok(json!({ "error": format!("Unknown tool: {name}") }).to_string());
        }
        let invocation = ToolInvocation::decode(name, input)?;
        debug!(tool = name, "Executing tool");
        let result = match self.run(invocation, ctx).await {
            Ok(value) => value,
            Err(err) => {
                warn!(tool = name, error = %err, "Tool call failed");
                json!({ "error": err.to_string() })
            }
        };
        serde_json::to_string(&result).map_err(|e| WealthWiseError::Serialization(e.to_string()))
    }

    async fn run(&self, invocation: ToolInvocation, ctx: Option<&ToolContext>) -> Result<Value> {
        match invocation {
            ToolInvocation::GetStockQuote { symbol } => self.market.quote(&symbol).await,
            ToolInvocation::GetPriceHistory {
                symbol,
                period,
                interval,
            } => self.market.price_history(&symbol, &period, &interval).await,
            ToolInvocation::GetCompanyInfo { symbol } => self.market.company_info(&symbol).await,
            ToolInvocation::GetSectorPerformance {} => self.market.sector_performance().await,
            ToolInvocation::GetFinancialPlans {} => internal::financial_plans(ctx).await,
            ToolInvocation::GetUserMemory {} => internal::user_memory(ctx).await,
            ToolInvocation::SaveUserMemory { key, value } => {
                internal::save_user_memory(ctx, &key, &value).await
            }
            ToolInvocation::GetActiveAlerts {} => internal::active_alerts(ctx).await,
            ToolInvocation::GetUsageSummary {} => internal::usage_summary(ctx).await,
            ToolInvocation::GetPendingInsights {} => internal::pending_insights(ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_history_with_defaults() {
        let invocation =
            ToolInvocation::decode("get_price_history", &json!({"symbol": "MSFT"})).unwrap();
        assert_eq!(
            invocation,
            ToolInvocation::GetPriceHistory {
                symbol: "MSFT".to_string(),
                period: "1mo".to_string(),
                interval: "1d".to_string(),
            }
        );
    }

    #[test]
    fn argument_free_tools_accept_null_and_extra_fields() {
        assert_eq!(
            ToolInvocation::decode("get_sector_performance", &Value::Null).unwrap(),
            ToolInvocation::GetSectorPerformance {}
        );
        assert_eq!(
            ToolInvocation::decode("get_user_memory", &json!({"verbose": true})).unwrap(),
            ToolInvocation::GetUserMemory {}
        );
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let err = ToolInvocation::decode("get_stock_quote", &json!({"ticker": "AAPL"})).unwrap_err();
        assert!(matches!(
            err,
            WealthWiseError::InvalidToolArguments { ref tool, .. } if tool == "get_stock_quote"
        ));
        let err = ToolInvocation::decode("get_stock_quote", &Value::String("{oops".into()))
            .unwrap_err();
        assert!(matches!(err, WealthWiseError::InvalidToolArguments { .. }));
        assert!(ToolInvocation::decode("save_user_memory", &json!({"key": "goal", "value": " "}))
            .is_err());
    }
}
