mod common;

use std::sync::Arc;

use common::{temp_db, ScriptedCompletionClient};
use wealthwise::conversations::ConversationStore;
use wealthwise::db::Database;
use wealthwise::interfaces::providers::{ContentBlock, Role};
use wealthwise::memory::{summary_key, FactSource, MemoryStore, MergeOutcome};
use wealthwise::services::events::{Event, EventHandler};
use wealthwise::services::memory::{MemoryExtractor, MemoryRecorder};

const SIGNALS: &str = r#"[{"key": "watched_tickers", "value": "NVDA"},
  {"key": "risk_concerns", "value": "worried about inflation"}]"#;

const SUMMARY: &str = r#"{"summary": "Discussed building an emergency fund.",
  "key_facts": ["Saves $500 a month"], "action_items": ["Open a high-yield account"]}"#;

fn scripted() -> Arc<ScriptedCompletionClient> {
    Arc::new(
        ScriptedCompletionClient::new(Vec::new())
            .with_reply_for("behavioral signals", SIGNALS)
            .with_reply_for("Summarize this conversation", SUMMARY),
    )
}

fn extractor(
    db: Database,
    completion: Arc<ScriptedCompletionClient>,
    threshold: usize,
) -> Arc<MemoryExtractor> {
    Arc::new(MemoryExtractor::new(
        db,
        completion,
        Some("gpt-4o-mini".to_string()),
        threshold,
        500,
    ))
}

async fn conversation_with(db: &Database, user_id: i32, turns: usize) -> i32 {
    let store = ConversationStore::new(db.clone());
    let conversation = store.create(user_id, "Saving plan").await.unwrap();
    for turn in 0..turns {
        let role = if turn % 2 == 0 { Role::User } else { Role::Assistant };
        store
            .append(conversation.id, role, &format!("turn {turn}"), &[], &[])
            .await
            .unwrap();
    }
    conversation.id
}

#[tokio::test]
async fn merge_appends_only_novel_values() {
    let (_dir, db) = temp_db().await;
    let store = MemoryStore::new(db);

    let put = |value: &'static str| {
        let store = &store;
        async move {
            store
                .merge_upsert(1, "watched_tickers", value, FactSource::Conversation, 0.8)
                .await
                .unwrap()
        }
    };
    assert_eq!(put("NVDA").await, MergeOutcome::Created);
    assert_eq!(put("AMD").await, MergeOutcome::Appended);
    assert_eq!(put("NVDA").await, MergeOutcome::Unchanged);
    assert_eq!(put("VDA").await, MergeOutcome::Unchanged);

    let fact = store.get(1, "watched_tickers").await.unwrap().unwrap();
    assert_eq!(fact.value, "NVDA, AMD");
    assert!(store.get(2, "watched_tickers").await.unwrap().is_none());
}

#[tokio::test]
async fn extraction_counts_only_changed_facts() {
    let (_dir, db) = temp_db().await;
    let store = MemoryStore::new(db.clone());
    store
        .merge_upsert(1, "watched_tickers", "NVDA", FactSource::Explicit, 1.0)
        .await
        .unwrap();
    let completion = scripted();
    let extractor = extractor(db, completion.clone(), 10);

    let long_reply = "x".repeat(800);
    let changed = extractor
        .extract_facts(1, "I'm worried about inflation", &long_reply)
        .await
        .unwrap();
    assert_eq!(changed, 1);

    let fact = store.get(1, "risk_concerns").await.unwrap().unwrap();
    assert_eq!(fact.value, "worried about inflation");
    assert_eq!(fact.source, "conversation");
    assert_eq!(fact.confidence, 0.8);

    let request = &completion.requests_matching("behavioral signals")[0];
    assert_eq!(request.max_tokens, 300);
    let ContentBlock::Text { text } = &request.messages[0].content[0] else {
        panic!("expected a text block");
    };
    assert!(text.contains(&"x".repeat(500)));
    assert!(!text.contains(&"x".repeat(501)));
}

#[tokio::test]
async fn summary_waits_for_threshold_then_overwrites() {
    let (_dir, db) = temp_db().await;
    let completion = scripted();
    let extractor = extractor(db.clone(), completion.clone(), 4);
    let conversation_id = conversation_with(&db, 1, 2).await;

    assert!(!extractor
        .summarize_conversation(1, conversation_id)
        .await
        .unwrap());
    assert!(completion.requests().is_empty());

    let store = ConversationStore::new(db.clone());
    store
        .append(conversation_id, Role::User, "turn 2", &[], &[])
        .await
        .unwrap();
    store
        .append(conversation_id, Role::Assistant, "turn 3", &[], &[])
        .await
        .unwrap();
    assert!(extractor
        .summarize_conversation(1, conversation_id)
        .await
        .unwrap());
    assert!(extractor
        .summarize_conversation(1, conversation_id)
        .await
        .unwrap());

    let summaries = extractor.conversation_summaries(1, 10).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].summary, "Discussed building an emergency fund.");
    assert_eq!(summaries[0].action_items, vec!["Open a high-yield account"]);

    let stored = MemoryStore::new(db)
        .get(1, &summary_key(conversation_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.source, "summary");
    let summary_request = &completion.requests_matching("Summarize this conversation")[0];
    assert_eq!(summary_request.max_tokens, 500);
}

#[tokio::test]
async fn recorder_extracts_from_the_latest_exchange() {
    let (_dir, db) = temp_db().await;
    let completion = scripted();
    let recorder = MemoryRecorder::new(db.clone(), extractor(db.clone(), completion.clone(), 10));
    let conversation_id = conversation_with(&db, 1, 2).await;

    recorder
        .handle(&Event::MessageSent {
            user_id: 1,
            conversation_id,
            message_count: 1,
        })
        .await
        .unwrap();

    let facts = MemoryStore::new(db).list_facts(1, 10).await.unwrap();
    assert_eq!(facts.len(), 2);
    let request = &completion.requests_matching("behavioral signals")[0];
    let ContentBlock::Text { text } = &request.messages[0].content[0] else {
        panic!("expected a text block");
    };
    assert!(text.contains("USER MESSAGE: turn 0"));
    assert!(text.contains("ADVISOR RESPONSE: turn 1"));
}

#[tokio::test]
async fn recorder_ignores_conversations_of_other_users() {
    let (_dir, db) = temp_db().await;
    let completion = scripted();
    let recorder = MemoryRecorder::new(db.clone(), extractor(db.clone(), completion.clone(), 10));
    let conversation_id = conversation_with(&db, 2, 2).await;

    recorder
        .handle(&Event::MessageSent {
            user_id: 1,
            conversation_id,
            message_count: 1,
        })
        .await
        .unwrap();
    assert!(completion.requests().is_empty());
    assert!(MemoryStore::new(db).list_facts(1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn only_the_exact_summary_prefix_counts_as_a_summary() {
    let (_dir, db) = temp_db().await;
    let store = MemoryStore::new(db);
    store
        .put(1, &summary_key(12), "{}", FactSource::Summary, 0.9)
        .await
        .unwrap();
    store
        .put(1, "conversationXsummaryY12", "lookalike", FactSource::Explicit, 1.0)
        .await
        .unwrap();

    let summaries = store.list_summaries(1, 10).await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].key, "conversation_summary_12");

    let facts = store.list_facts(1, 10).await.unwrap();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].key, "conversationXsummaryY12");
}
