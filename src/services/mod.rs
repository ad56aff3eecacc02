pub mod chat;
pub mod entitlement;
pub mod events;
pub mod follow_ups;
pub mod insights;
pub mod memory;
pub mod structured;
