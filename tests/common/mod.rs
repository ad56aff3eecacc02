#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use wealthwise::client::Advisor;
use wealthwise::config::Config;
use wealthwise::db::Database;
use wealthwise::error::{Result, WealthWiseError};
use wealthwise::factories::advisor_factory::AdvisorFactory;
use wealthwise::interfaces::providers::{
    CompletionClient, CompletionRequest, CompletionResponse, ContentBlock, MarketDataProvider,
};

/// Completion double.
///
/// Requests that offer tools (the conversation loop) pop the scripted queue. All other
/// requests get the first `with_reply_for` text whose marker appears in the system
/// prompt, else the fallback text.
pub struct ScriptedCompletionClient {
    chat: Mutex<VecDeque<CompletionResponse>>,
    replies: Vec<(String, String)>,
    fallback: String,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedCompletionClient {
    pub fn new(chat: Vec<CompletionResponse>) -> Self {
        Self {
            chat: Mutex::new(VecDeque::from(chat)),
            replies: Vec::new(),
            fallback: "[]".to_string(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn with_fallback(mut self, text: &str) -> Self {
        self.fallback = text.to_string();
        self
    }

    pub fn with_reply_for(mut self, system_marker: &str, text: &str) -> Self {
        self.replies
            .push((system_marker.to_string(), text.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn chat_requests(&self) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| !r.tools.is_empty())
            .collect()
    }

    pub fn requests_matching(&self, system_marker: &str) -> Vec<CompletionRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.system.contains(system_marker))
            .collect()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        self.requests.lock().unwrap().push(request.clone());
        if !request.tools.is_empty() {
            return Ok(self
                .chat
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| text_response("(no scripted reply)")));
        }
        let text = self
            .replies
            .iter()
            .find(|(marker, _)| request.system.contains(marker.as_str()))
            .map(|(_, text)| text.clone())
            .unwrap_or_else(|| self.fallback.clone());
        Ok(text_response(&text))
    }
}

pub fn text_response(text: &str) -> CompletionResponse {
    CompletionResponse {
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
    }
}

pub fn tool_response(text: Option<&str>, calls: &[(&str, &str, Value)]) -> CompletionResponse {
    let mut content = Vec::new();
    if let Some(text) = text {
        content.push(ContentBlock::Text {
            text: text.to_string(),
        });
    }
    for (id, name, input) in calls {
        content.push(ContentBlock::ToolUse {
            id: id.to_string(),
            name: name.to_string(),
            input: input.clone(),
        });
    }
    CompletionResponse { content }
}

/// Fixed quotes; remembers which symbols were asked for.
#[derive(Default)]
pub struct StaticMarketData {
    pub quoted: Mutex<Vec<String>>,
}

#[async_trait]
impl MarketDataProvider for StaticMarketData {
    async fn quote(&self, symbol: &str) -> Result<Value> {
        let symbol = symbol.trim().to_uppercase();
        self.quoted.lock().unwrap().push(symbol.clone());
        Ok(json!({
            "symbol": symbol,
            "price": 189.5,
            "change": 2.25,
            "change_percent": 1.2,
        }))
    }

    async fn price_history(&self, symbol: &str, period: &str, interval: &str) -> Result<Value> {
        Ok(json!({
            "symbol": symbol,
            "period": period,
            "interval": interval,
            "data_points": 0,
            "history": [],
        }))
    }

    async fn company_info(&self, symbol: &str) -> Result<Value> {
        Ok(json!({ "symbol": symbol, "name": "Example Corp", "sector": "Technology" }))
    }

    async fn sector_performance(&self) -> Result<Value> {
        Ok(json!({ "sectors": [{ "sector": "Technology", "change_percent": 0.8 }] }))
    }
}

/// Every lookup fails as if the upstream service were down.
pub struct FailingMarketData;

#[async_trait]
impl MarketDataProvider for FailingMarketData {
    async fn quote(&self, symbol: &str) -> Result<Value> {
        Err(WealthWiseError::Http(format!("quote for {symbol} unavailable")))
    }

    async fn price_history(&self, symbol: &str, _period: &str, _interval: &str) -> Result<Value> {
        Err(WealthWiseError::Http(format!("history for {symbol} unavailable")))
    }

    async fn company_info(&self, symbol: &str) -> Result<Value> {
        Err(WealthWiseError::Http(format!("company info for {symbol} unavailable")))
    }

    async fn sector_performance(&self) -> Result<Value> {
        Err(WealthWiseError::Http("sector data unavailable".to_string()))
    }
}

/// Fresh migrated database in a temp dir. Keep the `TempDir` alive for the test.
pub async fn temp_db() -> (TempDir, Database) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wealthwise.db");
    let db = Database::open(path.to_string_lossy()).await.unwrap();
    (dir, db)
}

pub fn advisor(db: Database, completion: Arc<ScriptedCompletionClient>) -> Advisor {
    AdvisorFactory::create_with_providers(
        &Config::default(),
        db,
        completion,
        Arc::new(StaticMarketData::default()),
    )
}
