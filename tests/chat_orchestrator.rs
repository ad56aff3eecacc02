mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::timeout;

use common::{
    advisor, temp_db, text_response, tool_response, FailingMarketData, ScriptedCompletionClient,
    StaticMarketData,
};
use wealthwise::config::Config;
use wealthwise::conversations::ConversationStore;
use wealthwise::error::Result;
use wealthwise::factories::advisor_factory::AdvisorFactory;
use wealthwise::interfaces::providers::{
    CompletionClient, CompletionRequest, CompletionResponse, ContentBlock, Role,
};
use wealthwise::services::chat::MAX_TOOL_ROUNDS;
use wealthwise::services::entitlement::{EntitlementGate, Feature};
use wealthwise::WealthWiseError;

#[tokio::test]
async fn quote_question_runs_one_tool_round_and_stores_one_reply() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![
        tool_response(
            None,
            &[("call_1", "get_stock_quote", json!({"symbol": "AAPL"}))],
        ),
        text_response("AAPL trades at $189.50, up 1.2% today."),
    ]));
    let advisor = advisor(db, completion.clone());

    let reply = advisor
        .send_message(1, None, "How is AAPL doing?")
        .await
        .unwrap();
    assert_eq!(reply.message.role, Role::Assistant);
    assert_eq!(reply.message.content, "AAPL trades at $189.50, up 1.2% today.");
    let calls = reply.message.tool_calls.clone().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "get_stock_quote");
    assert_eq!(calls[0].input, json!({"symbol": "AAPL"}));
    let results = reply.message.tool_results.clone().unwrap();
    assert_eq!(results[0].tool_use_id, "call_1");
    assert_eq!(results[0].result["price"], json!(189.5));

    let chat = completion.chat_requests();
    assert_eq!(chat.len(), 2);
    let second = &chat[1].messages;
    let tool_turn = second.last().unwrap();
    assert_eq!(tool_turn.role, Role::User);
    assert!(matches!(
        &tool_turn.content[0],
        ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "call_1"
    ));
    let assistant_turn = &second[second.len() - 2];
    assert_eq!(assistant_turn.role, Role::Assistant);
    assert!(matches!(
        &assistant_turn.content[0],
        ContentBlock::ToolUse { id, name, .. } if id == "call_1" && name == "get_stock_quote"
    ));

    let (conversation, messages) = advisor
        .get_messages(1, reply.conversation_id)
        .await
        .unwrap();
    assert_eq!(conversation.title, "How is AAPL doing?");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].role, Role::Assistant);
    assert_eq!(messages[1].tool_calls, reply.message.tool_calls);
    assert_eq!(messages[1].tool_results, reply.message.tool_results);

    let usage = advisor.check_entitlement(1, Feature::Messages).await.unwrap();
    assert_eq!(usage.usage, 1);
    advisor.wait_idle().await;
}

#[tokio::test]
async fn unknown_or_foreign_conversation_is_not_found() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![text_response("Hello!")]));
    let advisor = advisor(db, completion.clone());

    let err = advisor.send_message(1, Some(999), "hi").await.unwrap_err();
    assert!(matches!(err, WealthWiseError::NotFound(_)));

    let owned = advisor.send_message(2, None, "mine").await.unwrap();
    let err = advisor
        .send_message(1, Some(owned.conversation_id), "let me in")
        .await
        .unwrap_err();
    assert!(matches!(err, WealthWiseError::NotFound(_)));
    assert_eq!(completion.chat_requests().len(), 1);
    advisor.wait_idle().await;
}

#[tokio::test]
async fn tool_loop_stops_after_round_budget() {
    let (_dir, db) = temp_db().await;
    let script = (1..=MAX_TOOL_ROUNDS + 1)
        .map(|round| {
            let id = format!("call_{round}");
            let text = format!("Round {round}");
            tool_response(
                Some(&text),
                &[(id.as_str(), "get_sector_performance", json!({}))],
            )
        })
        .collect();
    let completion = Arc::new(ScriptedCompletionClient::new(script));
    let advisor = advisor(db, completion.clone());

    let reply = advisor
        .send_message(1, None, "Which sectors are hot?")
        .await
        .unwrap();
    assert_eq!(completion.chat_requests().len(), MAX_TOOL_ROUNDS);
    assert_eq!(reply.message.content, format!("Round {MAX_TOOL_ROUNDS}"));
    assert_eq!(reply.message.tool_calls.unwrap().len(), MAX_TOOL_ROUNDS);
    advisor.wait_idle().await;
}

#[tokio::test]
async fn unknown_tool_is_reported_back_to_the_model() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![
        tool_response(None, &[("call_x", "buy_stock", json!({"symbol": "AAPL"}))]),
        text_response("I can't place trades, but here is what I know."),
    ]));
    let advisor = advisor(db, completion.clone());

    let reply = advisor.send_message(1, None, "Buy AAPL").await.unwrap();
    let results = reply.message.tool_results.unwrap();
    assert_eq!(results[0].result, json!({"error": "Unknown tool: buy_stock"}));

    let chat = completion.chat_requests();
    let tool_turn = chat[1].messages.last().unwrap();
    assert!(matches!(
        &tool_turn.content[0],
        ContentBlock::ToolResult { is_error: true, .. }
    ));
    advisor.wait_idle().await;
}

#[tokio::test]
async fn failing_tool_does_not_abort_its_siblings() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![
        tool_response(
            Some("Let me check."),
            &[
                ("call_a", "get_company_info", json!({"symbol": "AAPL"})),
                ("call_b", "get_financial_plans", json!({})),
            ],
        ),
        text_response("Company data is down, and you have no plans yet."),
    ]));
    let advisor = AdvisorFactory::create_with_providers(
        &Config::default(),
        db,
        completion.clone(),
        Arc::new(FailingMarketData),
    );

    let reply = advisor
        .send_message(1, None, "Tell me about Apple and my plans")
        .await
        .unwrap();
    assert_eq!(
        reply.message.content,
        "Company data is down, and you have no plans yet."
    );
    let results = reply.message.tool_results.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].result["error"]
        .as_str()
        .unwrap()
        .contains("company info for AAPL unavailable"));
    assert_eq!(results[1].tool_use_id, "call_b");
    assert_eq!(results[1].result["total"], json!(0));

    let chat = completion.chat_requests();
    assert_eq!(chat.len(), 2);
    let tool_turn = chat[1].messages.last().unwrap();
    assert_eq!(tool_turn.content.len(), 2);
    assert!(matches!(
        &tool_turn.content[0],
        ContentBlock::ToolResult { tool_use_id, is_error: true, .. } if tool_use_id == "call_a"
    ));
    assert!(matches!(
        &tool_turn.content[1],
        ContentBlock::ToolResult { tool_use_id, is_error: false, .. } if tool_use_id == "call_b"
    ));
    advisor.wait_idle().await;
}

#[tokio::test]
async fn malformed_tool_arguments_fail_the_request_but_keep_the_user_message() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![tool_response(
        None,
        &[("call_1", "get_stock_quote", json!({"ticker": "AAPL"}))],
    )]));
    let advisor = advisor(db, completion.clone());

    let err = advisor
        .send_message(1, None, "Quote AAPL")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WealthWiseError::InvalidToolArguments { ref tool, .. } if tool == "get_stock_quote"
    ));

    let conversations = advisor.list_conversations(1, 10).await.unwrap();
    assert_eq!(conversations.len(), 1);
    let (_, messages) = advisor
        .get_messages(1, conversations[0].id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "Quote AAPL");

    let usage = advisor.check_entitlement(1, Feature::Messages).await.unwrap();
    assert_eq!(usage.usage, 0);
    advisor.wait_idle().await;
}

#[tokio::test]
async fn free_tier_is_denied_after_monthly_limit() {
    let (_dir, db) = temp_db().await;
    let gate = EntitlementGate::new(db.clone());
    for _ in 0..5 {
        gate.increment(1, Feature::Messages).await.unwrap();
    }
    let completion = Arc::new(ScriptedCompletionClient::new(vec![text_response("unused")]));
    let advisor = advisor(db, completion.clone());

    let err = advisor.send_message(1, None, "one more").await.unwrap_err();
    match err {
        WealthWiseError::EntitlementDenied {
            feature,
            usage,
            limit,
            is_pro,
        } => {
            assert_eq!(feature, "messages");
            assert_eq!(usage, 5);
            assert_eq!(limit, 5);
            assert!(!is_pro);
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert!(completion.requests().is_empty());
    assert!(advisor.list_conversations(1, 10).await.unwrap().is_empty());

    advisor.set_subscription_status(1, "active").await.unwrap();
    let reply = advisor.send_message(1, None, "one more").await.unwrap();
    assert_eq!(reply.message.content, "unused");
    advisor.wait_idle().await;
}

#[tokio::test]
async fn messages_keep_strict_order_and_bump_the_conversation() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![
        text_response("First answer."),
        text_response("Second answer."),
    ]));
    let advisor = advisor(db, completion.clone());

    let first = advisor
        .send_message(1, None, "Should I open a Roth IRA?")
        .await
        .unwrap();
    let second = advisor
        .send_message(1, Some(first.conversation_id), "What about a 401k?")
        .await
        .unwrap();
    assert_eq!(second.conversation_id, first.conversation_id);

    let (conversation, messages) = advisor
        .get_messages(1, first.conversation_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 4);
    assert!(messages
        .windows(2)
        .all(|pair| pair[0].created_at < pair[1].created_at));
    let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert!(conversation.updated_at >= messages[3].created_at);
    assert_eq!(conversation.title, "Should I open a Roth IRA?");

    // the second turn replays the first exchange
    let chat = completion.chat_requests();
    assert_eq!(chat[1].messages.len(), 3);
    advisor.wait_idle().await;
}

const FOLLOW_UP_MARKER: &str = "natural follow-up questions";

#[tokio::test]
async fn follow_ups_are_stored_on_the_reply_and_capped_at_three() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(
        ScriptedCompletionClient::new(vec![text_response("Diversify across sectors.")])
            .with_reply_for(
                FOLLOW_UP_MARKER,
                r#"```json
["Compare with MSFT", "What about dividends?", "Show 5-year performance", "Extra"]
```"#,
            ),
    );
    let advisor = advisor(db, completion.clone());

    let reply = advisor
        .send_message(1, None, "How should I diversify?")
        .await
        .unwrap();
    advisor.wait_idle().await;

    let (_, messages) = advisor
        .get_messages(1, reply.conversation_id)
        .await
        .unwrap();
    let stored = messages.iter().find(|m| m.id == reply.message.id).unwrap();
    assert_eq!(
        stored.follow_ups,
        Some(vec![
            "Compare with MSFT".to_string(),
            "What about dividends?".to_string(),
            "Show 5-year performance".to_string(),
        ])
    );
    assert!(messages[0].follow_ups.is_none());
    let follow_up_request = &completion.requests_matching(FOLLOW_UP_MARKER)[0];
    assert_eq!(follow_up_request.max_tokens, 200);
    assert_eq!(follow_up_request.model.as_deref(), Some("gpt-4o-mini"));
}

/// Holds follow-up completions until released.
struct GatedFollowUps {
    inner: ScriptedCompletionClient,
    release: Notify,
}

#[async_trait]
impl CompletionClient for GatedFollowUps {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        if request.system.contains(FOLLOW_UP_MARKER) {
            self.release.notified().await;
        }
        self.inner.complete(request).await
    }
}

#[tokio::test]
async fn reply_returns_before_follow_ups_finish() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(GatedFollowUps {
        inner: ScriptedCompletionClient::new(vec![text_response("Start with an index fund.")])
            .with_reply_for(FOLLOW_UP_MARKER, r#"["Which index fund?"]"#),
        release: Notify::new(),
    });
    let advisor = AdvisorFactory::create_with_providers(
        &Config::default(),
        db,
        completion.clone(),
        Arc::new(StaticMarketData::default()),
    );

    let reply = timeout(
        Duration::from_secs(5),
        advisor.send_message(1, None, "Where do I start investing?"),
    )
    .await
    .expect("reply waited on follow-up generation")
    .unwrap();
    assert_eq!(reply.message.content, "Start with an index fund.");
    assert!(reply.message.follow_ups.is_none());

    completion.release.notify_one();
    advisor.wait_idle().await;
    let (_, messages) = advisor
        .get_messages(1, reply.conversation_id)
        .await
        .unwrap();
    assert_eq!(
        messages[1].follow_ups,
        Some(vec!["Which index fund?".to_string()])
    );
}

#[tokio::test]
async fn deleted_conversation_disappears() {
    let (_dir, db) = temp_db().await;
    let completion = Arc::new(ScriptedCompletionClient::new(vec![text_response("Sure.")]));
    let advisor = advisor(db, completion);

    let reply = advisor.send_message(1, None, "hello").await.unwrap();
    advisor.wait_idle().await;
    advisor
        .delete_conversation(1, reply.conversation_id)
        .await
        .unwrap();
    assert!(advisor.list_conversations(1, 10).await.unwrap().is_empty());
    let err = advisor
        .delete_conversation(1, reply.conversation_id)
        .await
        .unwrap_err();
    assert!(matches!(err, WealthWiseError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_creates_each_get_their_own_conversation() {
    let (_dir, db) = temp_db().await;

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let store = ConversationStore::new(db.clone());
            tokio::spawn(async move {
                let title = format!("title-{i}");
                let created = store.create(7, &title).await.unwrap();
                (title, created)
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let (title, created) = task.await.unwrap();
        assert_eq!(created.title, title);
        assert_eq!(created.user_id, 7);
        ids.push(created.id);
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 32);
}
