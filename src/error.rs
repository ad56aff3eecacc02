use thiserror::Error;

#[derive(Debug, Error)]
pub enum WealthWiseError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("database error: {0}")]
    Database(String),
    #[error("runtime error: {0}")]
    Runtime(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidToolArguments { tool: String, reason: String },
    #[error("{}", entitlement_message(.feature, .usage, .limit, .is_pro))]
    EntitlementDenied {
        feature: String,
        usage: i64,
        limit: i64,
        is_pro: bool,
    },
    #[error("completion call timed out after {0}s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, WealthWiseError>;

fn entitlement_message(feature: &str, usage: &i64, limit: &i64, is_pro: &bool) -> String {
    let period = if feature == "insights" {
        "today"
    } else {
        "this month"
    };
    let guidance = if *is_pro {
        "Try again next period."
    } else {
        "Upgrade to Pro for higher limits."
    };
    format!("You've used {usage} of {limit} {feature} {period}. {guidance}")
}
