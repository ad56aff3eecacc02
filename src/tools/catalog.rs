use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::interfaces::providers::ToolSpec;

/// Bumped whenever a tool is added. Existing entries never change meaning.
pub const TOOL_CATALOG_VERSION: u32 = 2;

pub const GET_STOCK_QUOTE: &str = "get_stock_quote";
pub const GET_PRICE_HISTORY: &str = "get_price_history";
pub const GET_COMPANY_INFO: &str = "get_company_info";
pub const GET_SECTOR_PERFORMANCE: &str = "get_sector_performance";
pub const GET_FINANCIAL_PLANS: &str = "get_financial_plans";
pub const GET_USER_MEMORY: &str = "get_user_memory";
pub const SAVE_USER_MEMORY: &str = "save_user_memory";
pub const GET_ACTIVE_ALERTS: &str = "get_active_alerts";
pub const GET_USAGE_SUMMARY: &str = "get_usage_summary";
pub const GET_PENDING_INSIGHTS: &str = "get_pending_insights";

fn tool_spec(name: &str, description: &str, input_schema: Value) -> ToolSpec {
    ToolSpec {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn no_arguments() -> Value {
    json!({ "type": "object", "properties": {}, "required": [] })
}

fn symbol_only() -> Value {
    json!({
        "type": "object",
        "properties": {
            "symbol": { "type": "string", "description": "The stock ticker symbol (e.g., AAPL, MSFT, GOOGL)" }
        },
        "required": ["symbol"]
    })
}

static MARKET_TOOLS: Lazy<Vec<ToolSpec>> = Lazy::new(|| {
    vec![
        tool_spec(
            GET_STOCK_QUOTE,
            "Get a real-time stock quote including current price, change, volume, and market cap. Use this when the user asks about a stock's current price or trading activity.",
            symbol_only(),
        ),
        tool_spec(
            GET_PRICE_HISTORY,
            "Get historical OHLCV price data for trend analysis. Use this when the user asks about price trends, historical performance, or a stock's movement over time.",
            json!({
                "type": "object",
                "properties": {
                    "symbol": { "type": "string", "description": "The stock ticker symbol" },
                    "period": {
                        "type": "string",
                        "description": "Time period for history. Options: 1d, 5d, 1mo, 3mo, 6mo, 1y, 2y, 5y, ytd, max",
                        "default": "1mo"
                    },
                    "interval": {
                        "type": "string",
                        "description": "Data interval. Options: 1d, 1wk, 1mo",
                        "default": "1d"
                    }
                },
                "required": ["symbol"]
            }),
        ),
        tool_spec(
            GET_COMPANY_INFO,
            "Get fundamental company information including P/E ratio, sector, industry, description, 52-week range, beta, and EPS. Use this when the user asks about a company's fundamentals or what a company does.",
            symbol_only(),
        ),
        tool_spec(
            GET_SECTOR_PERFORMANCE,
            "Get performance data for all major market sectors via their ETFs (XLK, XLV, XLF, etc.). Use this when the user asks about sector trends or a market overview.",
            no_arguments(),
        ),
    ]
});

static INTERNAL_TOOLS: Lazy<Vec<ToolSpec>> = Lazy::new(|| {
    vec![
        tool_spec(
            GET_FINANCIAL_PLANS,
            "Get the user's active financial plans including goals, timelines, and strategies. Use this when the user asks about their goals, plans, or financial progress.",
            no_arguments(),
        ),
        tool_spec(
            GET_USER_MEMORY,
            "Retrieve what you remember about this user from past conversations: interests, concerns, watched tickers, life events, and preferences.",
            no_arguments(),
        ),
        tool_spec(
            SAVE_USER_MEMORY,
            "Save an important fact about the user for future reference. Use this when the user explicitly shares something worth remembering (e.g., 'I just got a raise').",
            json!({
                "type": "object",
                "properties": {
                    "key": {
                        "type": "string",
                        "description": "A short snake_case identifier (e.g., 'life_events', 'investment_interests')"
                    },
                    "value": { "type": "string", "description": "The information to remember" }
                },
                "required": ["key", "value"]
            }),
        ),
        tool_spec(
            GET_ACTIVE_ALERTS,
            "Get the user's active price alerts. Use this when the user asks about their alerts or what they're monitoring.",
            no_arguments(),
        ),
        tool_spec(
            GET_USAGE_SUMMARY,
            "Get the user's current usage vs limits for messages, plans, alerts, and insights. Use when the user asks about remaining usage or subscription status.",
            no_arguments(),
        ),
        tool_spec(
            GET_PENDING_INSIGHTS,
            "Get the user's open advisory insights (opportunities, warnings and suggestions). Use when the user asks what their advisor recommends.",
            no_arguments(),
        ),
    ]
});

/// Market tools followed by internal tools, in a stable order.
pub fn all_tools() -> Vec<ToolSpec> {
    MARKET_TOOLS
        .iter()
        .chain(INTERNAL_TOOLS.iter())
        .cloned()
        .collect()
}

pub fn is_known(name: &str) -> bool {
    MARKET_TOOLS
        .iter()
        .chain(INTERNAL_TOOLS.iter())
        .any(|tool| tool.name == name)
}
