use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use wealthwise::error::{Result, WealthWiseError};
use wealthwise::services::events::{Event, EventBus, EventHandler, MESSAGE_SENT, PLAN_CREATED};

#[derive(Default)]
struct Recording {
    seen: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventHandler for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.seen.lock().unwrap().push(event.clone());
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl EventHandler for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn handle(&self, _event: &Event) -> Result<()> {
        Err(WealthWiseError::Runtime("handler exploded".to_string()))
    }
}

struct Panicking;

#[async_trait]
impl EventHandler for Panicking {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn handle(&self, _event: &Event) -> Result<()> {
        panic!("handler panicked");
    }
}

fn message_sent(count: i64) -> Event {
    Event::MessageSent {
        user_id: 1,
        conversation_id: 10,
        message_count: count,
    }
}

#[tokio::test]
async fn emit_returns_before_handlers_finish() {
    let recording = Arc::new(Recording::default());
    let mut bus = EventBus::new();
    bus.subscribe(MESSAGE_SENT, recording.clone());

    bus.emit(message_sent(1));
    assert!(recording.seen.lock().unwrap().is_empty());

    bus.wait_idle().await;
    assert_eq!(*recording.seen.lock().unwrap(), vec![message_sent(1)]);
}

#[tokio::test]
async fn failing_and_panicking_handlers_do_not_affect_siblings() {
    let recording = Arc::new(Recording::default());
    let mut bus = EventBus::new();
    bus.subscribe(MESSAGE_SENT, Arc::new(Failing));
    bus.subscribe(MESSAGE_SENT, Arc::new(Panicking));
    bus.subscribe(MESSAGE_SENT, recording.clone());
    assert_eq!(bus.handler_count(MESSAGE_SENT), 3);

    bus.emit(message_sent(1));
    bus.emit(message_sent(2));
    bus.wait_idle().await;

    let mut counts: Vec<i64> = recording
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|event| match event {
            Event::MessageSent { message_count, .. } => *message_count,
            _ => -1,
        })
        .collect();
    counts.sort();
    assert_eq!(counts, vec![1, 2]);
}

#[tokio::test]
async fn handlers_only_see_their_event() {
    let recording = Arc::new(Recording::default());
    let mut bus = EventBus::new();
    bus.subscribe(PLAN_CREATED, recording.clone());
    assert_eq!(bus.handler_count(MESSAGE_SENT), 0);

    bus.emit(message_sent(1));
    bus.emit(Event::PlanCreated {
        user_id: 1,
        plan_title: "Emergency fund".to_string(),
    });
    bus.wait_idle().await;

    let seen = recording.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].name(), PLAN_CREATED);
}

#[tokio::test]
async fn wait_idle_returns_immediately_when_nothing_runs() {
    let bus = EventBus::new();
    tokio::time::timeout(Duration::from_secs(1), bus.wait_idle())
        .await
        .unwrap();
}
