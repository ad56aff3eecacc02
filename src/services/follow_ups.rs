use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::conversations::ConversationStore;
use crate::db::Database;
use crate::error::Result;
use crate::interfaces::providers::{ChatMessage, CompletionClient, CompletionRequest};
use crate::services::events::{Event, EventHandler};
use crate::services::structured::parse_json_output;

const MAX_FOLLOW_UPS: usize = 3;
const QUESTION_CHARS: usize = 200;
const ANSWER_CHARS: usize = 400;

const FOLLOW_UP_PROMPT: &str = "Given a user question and advisor response, suggest 2-3 natural follow-up questions the user might want to ask.
Keep each suggestion concise (under 8 words). Make them specific to the conversation context.
Return ONLY a JSON array of strings, no other text. Example: [\"Compare with NVDA\", \"What about dividends?\", \"Show 5-year performance\"]";

/// Suggests next questions for the latest reply and stores them on that message.
/// Subscribed to `message.sent`, so the reply is returned before this runs.
pub struct FollowUpSuggester {
    completion: Arc<dyn CompletionClient>,
    conversations: ConversationStore,
    model: Option<String>,
    max_tokens: u32,
}

impl FollowUpSuggester {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        model: Option<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            completion,
            conversations: ConversationStore::new(db),
            model,
            max_tokens,
        }
    }

    /// Up to three short follow-up questions; empty when the model offers none.
    pub async fn suggest(&self, user_message: &str, reply: &str) -> Result<Vec<String>> {
        let question: String = user_message.chars().take(QUESTION_CHARS).collect();
        let answer: String = reply.chars().take(ANSWER_CHARS).collect();
        let request = CompletionRequest::new(
            FOLLOW_UP_PROMPT,
            vec![ChatMessage::user(format!("USER: {question}\nADVISOR: {answer}"))],
            self.max_tokens,
        )
        .with_model(self.model.clone());
        let response = self.completion.complete(request).await?;
        Ok(match parse_json_output(&response.text())? {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .take(MAX_FOLLOW_UPS)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        })
    }
}

#[async_trait]
impl EventHandler for FollowUpSuggester {
    fn name(&self) -> &str {
        "follow_up_suggester"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        let Event::MessageSent {
            user_id,
            conversation_id,
            ..
        } = *event
        else {
            return Ok(());
        };
        if self.conversations.get(user_id, conversation_id).await?.is_none() {
            debug!(user_id, conversation_id, "Conversation gone before follow-ups");
            return Ok(());
        }
        let Some(exchange) = self.conversations.last_exchange(conversation_id).await? else {
            return Ok(());
        };

        let suggestions = self.suggest(&exchange.user_message, &exchange.reply).await?;
        if suggestions.is_empty() {
            debug!(user_id, conversation_id, "No follow-up suggestions");
            return Ok(());
        }
        self.conversations
            .set_follow_ups(exchange.reply_id, &suggestions)
            .await?;
        debug!(
            user_id,
            conversation_id,
            message_id = exchange.reply_id,
            count = suggestions.len(),
            "Follow-up suggestions stored"
        );
        Ok(())
    }
}
