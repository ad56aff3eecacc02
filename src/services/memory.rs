use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversations::ConversationStore;
use crate::db::Database;
use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::{ChatMessage, CompletionClient, CompletionRequest};
use crate::memory::{summary_key, FactSource, MemoryStore, MergeOutcome};
use crate::services::events::{Event, EventHandler};
use crate::services::structured::parse_json_output;

const EXTRACTION_MAX_TOKENS: u32 = 300;
const SUMMARY_MAX_TOKENS: u32 = 500;
const EXTRACTION_RESPONSE_CHARS: usize = 500;
const EXTRACTED_CONFIDENCE: f64 = 0.8;
const SUMMARY_CONFIDENCE: f64 = 0.9;

const EXTRACTION_PROMPT: &str = "Analyze this conversation exchange between a user and their financial advisor.
Extract any behavioral signals worth remembering for future personalization.

Return a JSON array of objects, each with:
- key: a short snake_case identifier (e.g. \"interested_sectors\", \"risk_concerns\", \"watched_tickers\", \"life_events\", \"preferred_topics\")
- value: the extracted information as a concise string

Only extract genuinely useful signals. If there's nothing noteworthy, return an empty array [].
Return ONLY the JSON array, no other text.";

const SUMMARY_PROMPT: &str = "Summarize this conversation between a user and their financial advisor so a future session can pick up where it left off.

Return a JSON object with:
- summary: 2-3 sentences covering what was discussed and concluded
- key_facts: array of short strings with facts learned about the user's finances
- action_items: array of short strings with follow-ups the user or advisor committed to

Return ONLY the JSON object, no other text.";

/// Stored value under `conversation_summary_<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub summary: String,
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSignal {
    pub key: String,
    pub value: String,
}

/// Keeps entries with a non-empty string key and value.
pub fn parse_signals(text: &str) -> Result<Vec<ExtractedSignal>> {
    let value = parse_json_output(text)?;
    let Value::Array(items) = value else {
        return Err(WealthWiseError::Serialization(
            "expected a JSON array of memory signals".to_string(),
        ));
    };
    Ok(items
        .iter()
        .filter_map(|item| {
            let key = item.get("key")?.as_str()?.trim();
            let value = item.get("value")?.as_str()?.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some(ExtractedSignal {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect())
}

pub struct MemoryExtractor {
    completion: Arc<dyn CompletionClient>,
    store: MemoryStore,
    conversations: ConversationStore,
    model: Option<String>,
    summary_threshold: usize,
    summary_char_budget: usize,
}

impl MemoryExtractor {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        model: Option<String>,
        summary_threshold: usize,
        summary_char_budget: usize,
    ) -> Self {
        Self {
            completion,
            store: MemoryStore::new(db.clone()),
            conversations: ConversationStore::new(db),
            model,
            summary_threshold,
            summary_char_budget,
        }
    }

    /// Merge-upserts the behavioral signals found in one exchange. Returns how many
    /// facts were created or extended.
    pub async fn extract_facts(
        &self,
        user_id: i32,
        user_message: &str,
        assistant_response: &str,
    ) -> Result<usize> {
        let response: String = assistant_response
            .chars()
            .take(EXTRACTION_RESPONSE_CHARS)
            .collect();
        let request = CompletionRequest::new(
            EXTRACTION_PROMPT,
            vec![ChatMessage::user(format!(
                "USER MESSAGE: {user_message}\n\nADVISOR RESPONSE: {response}"
            ))],
            EXTRACTION_MAX_TOKENS,
        )
        .with_model(self.model.clone());
        let output = self.completion.complete(request).await?;
        let signals = parse_signals(&output.text())?;

        let mut changed = 0;
        for signal in &signals {
            let outcome = self
                .store
                .merge_upsert(
                    user_id,
                    &signal.key,
                    &signal.value,
                    FactSource::Conversation,
                    EXTRACTED_CONFIDENCE,
                )
                .await?;
            if outcome != MergeOutcome::Unchanged {
                changed += 1;
            }
        }
        debug!(user_id, extracted = signals.len(), changed, "Memory extraction done");
        Ok(changed)
    }

    /// Summarizes the conversation once it has at least `summary_threshold` messages,
    /// overwriting any earlier summary. Returns whether a summary was written.
    pub async fn summarize_conversation(&self, user_id: i32, conversation_id: i32) -> Result<bool> {
        let messages = self.conversations.messages(conversation_id).await?;
        if messages.len() < self.summary_threshold {
            return Ok(false);
        }
        let transcript = messages
            .iter()
            .map(|m| {
                let content: String = m.content.chars().take(self.summary_char_budget).collect();
                format!("{}: {}", m.role.as_str().to_uppercase(), content)
            })
            .collect::<Vec<_>>()
            .join("\n");

        let request = CompletionRequest::new(
            SUMMARY_PROMPT,
            vec![ChatMessage::user(transcript)],
            SUMMARY_MAX_TOKENS,
        )
        .with_model(self.model.clone());
        let output = self.completion.complete(request).await?;
        let summary: ConversationSummary = serde_json::from_value(parse_json_output(&output.text())?)
            .map_err(|e| WealthWiseError::Serialization(e.to_string()))?;
        let stored = serde_json::to_string(&summary)
            .map_err(|e| WealthWiseError::Serialization(e.to_string()))?;

        self.store
            .put(
                user_id,
                &summary_key(conversation_id),
                &stored,
                FactSource::Summary,
                SUMMARY_CONFIDENCE,
            )
            .await?;
        info!(user_id, conversation_id, messages = messages.len(), "Stored conversation summary");
        Ok(true)
    }

    /// Most recent summaries first; entries that no longer parse are skipped.
    pub async fn conversation_summaries(
        &self,
        user_id: i32,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>> {
        let facts = self.store.list_summaries(user_id, limit).await?;
        Ok(facts
            .iter()
            .filter_map(|fact| match serde_json::from_str(&fact.value) {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(user_id, key = %fact.key, error = %err, "Skipping unreadable summary");
                    None
                }
            })
            .collect())
    }
}

/// `message.sent` subscriber: extracts facts from the latest exchange, then refreshes
/// the conversation summary. Each step fails on its own.
pub struct MemoryRecorder {
    extractor: Arc<MemoryExtractor>,
    conversations: ConversationStore,
}

impl MemoryRecorder {
    pub fn new(db: Database, extractor: Arc<MemoryExtractor>) -> Self {
        Self {
            extractor,
            conversations: ConversationStore::new(db),
        }
    }
}

#[async_trait]
impl EventHandler for MemoryRecorder {
    fn name(&self) -> &str {
        "memory_recorder"
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
            debug!(user_id, conversation_id, "Conversation gone before memory update");
            return Ok(());
        }

        match self.conversations.last_exchange(conversation_id).await {
            Ok(Some(exchange)) => {
                if let Err(err) = self
                    .extractor
                    .extract_facts(user_id, &exchange.user_message, &exchange.reply)
                    .await
                {
                    warn!(user_id, conversation_id, error = %err, "Memory extraction failed");
                }
            }
            Ok(None) => debug!(user_id, conversation_id, "No complete exchange to extract from"),
            Err(err) => warn!(user_id, conversation_id, error = %err, "Failed to load last exchange"),
        }

        if let Err(err) = self
            .extractor
            .summarize_conversation(user_id, conversation_id)
            .await
        {
            warn!(user_id, conversation_id, error = %err, "Conversation summary failed");
        }
        Ok(())
    }
}
