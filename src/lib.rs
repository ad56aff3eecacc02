pub mod client;
pub mod config;
pub mod conversations;
pub mod db;
pub mod error;
pub mod factories;
pub mod insights;
pub mod interfaces;
pub mod memory;
pub mod profile;
pub mod providers;
pub mod services;
pub mod tools;
pub mod usage;

pub use crate::client::Advisor;
pub use crate::config::Config;
pub use crate::error::{Result, WealthWiseError};
pub use crate::services::chat::ChatReply;
pub use crate::services::entitlement::Feature;
