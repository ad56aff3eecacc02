use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{Result, WealthWiseError};

static FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z]*\s*(.*?)\s*```$").expect("valid fence regex"));

/// Parses model output that should be JSON, tolerating a surrounding markdown fence.
pub fn parse_json_output(text: &str) -> Result<Value> {
    let trimmed = text.trim();
    let body = FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map_or(trimmed, |m| m.as_str());
    serde_json::from_str(body).map_err(|e| WealthWiseError::Serialization(e.to_string()))
}
