use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::MarketDataProvider;

/// Forwards market lookups to a JSON market-data service.
///
/// Endpoints: `quote/{symbol}`, `history/{symbol}?period=&interval=`, `company/{symbol}`
/// and `sectors`.
pub struct HttpMarketDataProvider {
    base_url: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpMarketDataProvider {
    pub fn new(base_url: impl Into<String>, timeout_seconds: Option<u64>) -> Self {
        Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(timeout_seconds.unwrap_or(30)),
        }
    }

    async fn get_json(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'));
        let mut req = self.client.get(&url).timeout(self.timeout);
        if !query.is_empty() {
            req = req.query(query);
        }
        let response = req
            .send()
            .await
            .map_err(|e| WealthWiseError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WealthWiseError::Http(format!(
                "market data request failed ({status}): {body}"
            )));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| WealthWiseError::Serialization(e.to_string()))
    }
}

fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_uppercase()
}

#[async_trait]
impl MarketDataProvider for HttpMarketDataProvider {
    async fn quote(&self, symbol: &str) -> Result<Value> {
        self.get_json(&format!("quote/{}", normalize_symbol(symbol)), &[])
            .await
    }

    async fn price_history(&self, symbol: &str, period: &str, interval: &str) -> Result<Value> {
        self.get_json(
            &format!("history/{}", normalize_symbol(symbol)),
            &[("period", period), ("interval", interval)],
        )
        .await
    }

    async fn company_info(&self, symbol: &str) -> Result<Value> {
        self.get_json(&format!("company/{}", normalize_symbol(symbol)), &[])
            .await
    }

    async fn sector_performance(&self) -> Result<Value> {
        self.get_json("sectors", &[]).await
    }
}
