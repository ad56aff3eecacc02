//! In-process publish/subscribe.
//!
//! Handlers are registered while the bus is still owned mutably, before it is shared.
//! `emit` spawns one task per handler and returns immediately; a failing or panicking
//! handler is logged and never reaches the emitter or its siblings.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, warn};

use crate::error::Result;

pub const MESSAGE_SENT: &str = "message.sent";
pub const PLAN_CREATED: &str = "plan.created";
pub const ALERT_TRIGGERED: &str = "alert.triggered";

/// Events only carry primitive identifiers; handlers load what they need themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Event {
    MessageSent {
        user_id: i32,
        conversation_id: i32,
        /// User messages in the conversation so far, including this one.
        message_count: i64,
    },
    PlanCreated {
        user_id: i32,
        plan_title: String,
    },
    AlertTriggered {
        user_id: i32,
        symbol: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::MessageSent { .. } => MESSAGE_SENT,
            Event::PlanCreated { .. } => PLAN_CREATED,
            Event::AlertTriggered { .. } => ALERT_TRIGGERED,
        }
    }

    pub fn user_id(&self) -> i32 {
        match self {
            Event::MessageSent { user_id, .. }
            | Event::PlanCreated { user_id, .. }
            | Event::AlertTriggered { user_id, .. } => *user_id,
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, event: &Event) -> Result<()>;
}

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn enter(in_flight: &Arc<InFlight>) -> Self {
        in_flight.count.fetch_add(1, Ordering::SeqCst);
        Self(in_flight.clone())
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    in_flight: Arc<InFlight>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, event_name: &str, handler: Arc<dyn EventHandler>) {
        debug!(event = event_name, handler = handler.name(), "Subscribed event handler");
        self.handlers
            .entry(event_name.to_string())
            .or_default()
            .push(handler);
    }

    pub fn handler_count(&self, event_name: &str) -> usize {
        self.handlers.get(event_name).map_or(0, Vec::len)
    }

    /// Dispatches `event` to every subscriber without waiting for any of them.
    /// Must be called from within a tokio runtime.
    pub fn emit(&self, event: Event) {
        let name = event.name();
        let Some(handlers) = self.handlers.get(name) else {
            debug!(event = name, "No handlers registered");
            return;
        };
        for handler in handlers {
            let handler = handler.clone();
            let event = event.clone();
            let guard = InFlightGuard::enter(&self.in_flight);
            tokio::spawn(async move {
                let _guard = guard;
                let handler_name = handler.name().to_string();
                let task = tokio::spawn(async move { handler.handle(&event).await });
                match task.await {
                    Ok(Ok(())) => debug!(event = name, handler = %handler_name, "Event handled"),
                    Ok(Err(err)) => warn!(
                        event = name,
                        handler = %handler_name,
                        error = %err,
                        "Event handler failed"
                    ),
                    Err(join_err) => error!(
                        event = name,
                        handler = %handler_name,
                        error = %join_err,
                        "Event handler panicked"
                    ),
                }
            });
        }
    }

    /// Resolves once no handler task is running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.in_flight.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.in_flight.count.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}
