use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

use crate::error::{Result, WealthWiseError};

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_FAST_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_SQLITE_PATH: &str = "./data/wealthwise.db";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpenAiConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    /// Cheaper model used for background extraction, insights and follow-ups.
    pub fast_model: Option<String>,
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MarketDataConfig {
    pub base_url: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChatConfig {
    pub summary_threshold: Option<usize>,
    pub follow_up_max_tokens: Option<u32>,
    pub completion_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InsightsConfig {
    pub message_cadence: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MemoryConfig {
    pub summary_char_budget: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub openai: Option<OpenAiConfig>,
    pub database: Option<DatabaseConfig>,
    pub market_data: Option<MarketDataConfig>,
    pub chat: Option<ChatConfig>,
    pub insights: Option<InsightsConfig>,
    pub memory: Option<MemoryConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| WealthWiseError::Config(e.to_string()))?;
        let config: Config =
            serde_json::from_str(&content).map_err(|e| WealthWiseError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn resolve_env(mut self) -> Self {
        let openai = self.openai.get_or_insert_with(OpenAiConfig::default);
        if openai.api_key.is_none() {
            if let Ok(value) = env::var("OPENAI_API_KEY") {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    openai.api_key = Some(trimmed.to_string());
                }
            }
        }
        self
    }

    pub fn sqlite_path(&self) -> String {
        self.database
            .as_ref()
            .and_then(|db| db.sqlite_path.clone())
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string())
    }

    pub fn model(&self) -> String {
        self.openai
            .as_ref()
            .and_then(|o| o.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn fast_model(&self) -> String {
        self.openai
            .as_ref()
            .and_then(|o| o.fast_model.clone())
            .unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string())
    }

    pub fn summary_threshold(&self) -> usize {
        self.chat
            .as_ref()
            .and_then(|c| c.summary_threshold)
            .unwrap_or(10)
    }

    pub fn follow_up_max_tokens(&self) -> u32 {
        self.chat
            .as_ref()
            .and_then(|c| c.follow_up_max_tokens)
            .unwrap_or(200)
    }

    pub fn completion_timeout_seconds(&self) -> u64 {
        self.chat
            .as_ref()
            .and_then(|c| c.completion_timeout_seconds)
            .unwrap_or(60)
    }

    pub fn insight_cadence(&self) -> i64 {
        self.insights
            .as_ref()
            .and_then(|i| i.message_cadence)
            .filter(|n| *n > 0)
            .unwrap_or(5)
    }

    pub fn summary_char_budget(&self) -> usize {
        self.memory
            .as_ref()
            .and_then(|m| m.summary_char_budget)
            .unwrap_or(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_empty_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.sqlite_path(), DEFAULT_SQLITE_PATH);
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.insight_cadence(), 5);
        assert_eq!(config.summary_threshold(), 10);
        assert_eq!(config.completion_timeout_seconds(), 60);
    }

    #[test]
    fn zero_cadence_falls_back() {
        let config: Config =
            serde_json::from_str(r#"{"insights": {"message_cadence": 0}}"#).unwrap();
        assert_eq!(config.insight_cadence(), 5);
    }
}
