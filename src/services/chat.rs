use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::conversations::{
    title_from, Conversation, ConversationStore, Message, RecordedToolCall, RecordedToolResult,
};
use crate::db::Database;
use crate::error::{Result, WealthWiseError};
use crate::insights::{InsightStatus, InsightStore};
use crate::interfaces::providers::{
    ChatMessage, CompletionClient, CompletionRequest, ContentBlock, Role,
};
use crate::memory::MemoryStore;
use crate::profile::{FinancialProfile, ProfileStore};
use crate::services::entitlement::{EntitlementGate, Feature};
use crate::services::events::{Event, EventBus};
use crate::services::memory::MemoryExtractor;
use crate::tools::{ToolContext, ToolExecutor};

/// Upper bound on completion rounds per user message.
pub const MAX_TOOL_ROUNDS: usize = 5;
const CHAT_MAX_TOKENS: u32 = 4096;
const RECENT_INSIGHTS: usize = 5;
const MEMORY_PROMPT_LIMIT: usize = 50;
const PROMPT_SUMMARIES: usize = 3;

const ADVISOR_PERSONA: &str = "You are WealthWise, an expert AI financial advisor. You provide personalized financial guidance, market analysis, and investment insights.

Guidelines:
- Always use the available tools to look up real-time market data when discussing specific stocks or sectors
- Provide data-driven analysis with specific numbers
- Give balanced perspectives mentioning both risks and opportunities
- Tailor advice to the user's financial profile when available
- Include disclaimers that this is informational, not professional financial advice
- Be conversational and approachable while maintaining expertise
- When comparing investments, pull data for each one
- Format currency values and percentages clearly";

fn communication_style(level: Option<&str>) -> &'static str {
    match level.unwrap_or("college") {
        "elementary" => "Communication Style: Explain everything using very simple words and everyday analogies. Avoid all financial jargon. Keep sentences short and friendly.",
        "high_school" => "Communication Style: Use plain, straightforward language. When you must use a financial term, explain it briefly in parentheses.",
        "phd" => "Communication Style: Use advanced financial terminology and quantitative analysis freely. Reference concepts like CAPM, Sharpe ratio, efficient frontier and Monte Carlo simulations where relevant.",
        _ => "Communication Style: Use standard financial terminology. Provide thorough analysis with proper context. You can assume familiarity with common investment concepts like diversification, market cap, and P/E ratios.",
    }
}

fn advisor_tone(tone: Option<&str>) -> &'static str {
    match tone.unwrap_or("professional") {
        "friendly" => "Advisor Tone: Be warm, encouraging, and casual. Celebrate good financial decisions while staying honest about risks.",
        "mentor" => "Advisor Tone: Be educational and use a Socratic approach. Ask thought-provoking questions and explain the 'why' behind concepts.",
        "casual" => "Advisor Tone: Be relaxed, conversational, and occasionally humorous. Make finance feel approachable, not intimidating.",
        _ => "Advisor Tone: Be formal, data-driven, and precise. Focus on facts and figures. Present analysis in a structured, methodical way.",
    }
}

/// `$1,234,567` style, rounded to whole dollars.
pub fn format_currency(amount: f64) -> String {
    let rounded = amount.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if rounded < 0 {
        format!("-${grouped}")
    } else {
        format!("${grouped}")
    }
}

fn profile_section(profile: &FinancialProfile) -> String {
    let mut lines = vec!["User Financial Profile:".to_string()];
    let mut push = |label: &str, value: Option<String>| {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            lines.push(format!("- {label}: {value}"));
        }
    };
    let money = |v: Option<f64>| v.filter(|n| *n != 0.0).map(format_currency);
    push("Age", profile.age.filter(|a| *a > 0).map(|a| a.to_string()));
    push("Annual Income", money(profile.annual_income));
    push("Monthly Expenses", money(profile.monthly_expenses));
    push("Total Savings", money(profile.total_savings));
    push("Total Debt", money(profile.total_debt));
    push("Risk Tolerance", profile.risk_tolerance.clone());
    push("Investment Goals", profile.investment_goals.clone());
    push("Current Portfolio", profile.portfolio_description.clone());
    push("Experience Level", profile.experience_level.clone());
    push("Investment Timeline", profile.investment_timeline.clone());
    push("Interested Topics", profile.interested_topics.clone());
    lines.join("\n")
}

/// Replays stored messages as plain text; empty assistant turns are dropped.
fn transcript_from(history: &[Message]) -> Vec<ChatMessage> {
    history
        .iter()
        .filter(|m| m.role == Role::User || !m.content.is_empty())
        .map(|m| ChatMessage::text(m.role, m.content.clone()))
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub conversation_id: i32,
    pub message: Message,
}

pub struct ConversationOrchestrator {
    db: Database,
    completion: Arc<dyn CompletionClient>,
    tools: Arc<ToolExecutor>,
    events: Arc<EventBus>,
    memory: Arc<MemoryExtractor>,
    gate: EntitlementGate,
    conversations: ConversationStore,
    profiles: ProfileStore,
    insights: InsightStore,
    facts: MemoryStore,
}

impl ConversationOrchestrator {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        tools: Arc<ToolExecutor>,
        events: Arc<EventBus>,
        memory: Arc<MemoryExtractor>,
    ) -> Self {
        Self {
            completion,
            tools,
            events,
            memory,
            gate: EntitlementGate::new(db.clone()),
            conversations: ConversationStore::new(db.clone()),
            profiles: ProfileStore::new(db.clone()),
            insights: InsightStore::new(db.clone()),
            facts: MemoryStore::new(db.clone()),
            db,
        }
    }

    /// Runs one user turn end to end.
    ///
    /// Entitlement denial, an unknown conversation, a failed completion call and
    /// undecodable tool arguments fail the request. The user message stays stored once
    /// written. Everything after the assistant message is persisted is best-effort and
    /// runs off `message.sent`, including follow-up suggestions.
    pub async fn send_message(
        &self,
        user_id: i32,
        conversation_id: Option<i32>,
        text: &str,
    ) -> Result<ChatReply> {
        self.gate.require(user_id, Feature::Messages).await?;

        let conversation = match conversation_id {
            Some(id) => self
                .conversations
                .get(user_id, id)
                .await?
                .ok_or_else(|| WealthWiseError::NotFound("conversation".to_string()))?,
            None => self.conversations.create(user_id, &title_from(text)).await?,
        };
        let conversation_id = conversation.id;
        self.conversations
            .append(conversation_id, Role::User, text, &[], &[])
            .await?;

        let history = self.conversations.messages(conversation_id).await?;
        let system = self.system_prompt(user_id).await?;
        let (final_text, calls, results) = self
            .run_tool_loop(user_id, conversation_id, system, transcript_from(&history))
            .await?;

        let message = self
            .conversations
            .append(conversation_id, Role::Assistant, &final_text, &calls, &results)
            .await?;
        if history.len() <= 1 {
            self.conversations
                .set_title(conversation_id, &title_from(text))
                .await?;
        }
        info!(
            user_id,
            conversation_id,
            tool_calls = calls.len(),
            "Assistant reply stored"
        );

        self.after_reply(user_id, conversation_id).await;

        Ok(ChatReply {
            conversation_id,
            message,
        })
    }

    async fn run_tool_loop(
        &self,
        user_id: i32,
        conversation_id: i32,
        system: String,
        mut transcript: Vec<ChatMessage>,
    ) -> Result<(String, Vec<RecordedToolCall>, Vec<RecordedToolResult>)> {
        let ctx = ToolContext::new(self.db.clone(), user_id);
        let catalog = self.tools.catalog();
        let mut final_text = String::new();
        let mut calls = Vec::new();
        let mut results = Vec::new();

        for round in 0..MAX_TOOL_ROUNDS {
            let request = CompletionRequest::new(system.clone(), transcript.clone(), CHAT_MAX_TOKENS)
                .with_tools(catalog.clone());
            let response = self.completion.complete(request).await?;

            let text = response.text();
            if !text.is_empty() {
                final_text = text;
            }
            let uses: Vec<(String, String, Value)> = response
                .tool_uses()
                .into_iter()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            if uses.is_empty() {
                return Ok((final_text, calls, results));
            }

            let mut result_blocks = Vec::with_capacity(uses.len());
            for (id, name, input) in uses {
                debug!(user_id, conversation_id, round, tool = %name, "Tool requested");
                let output = self.tools.execute(&name, &input, Some(&ctx)).await?;
                let parsed: Value =
                    serde_json::from_str(&output).unwrap_or_else(|_| Value::String(output.clone()));
                let is_error = parsed.get("error").is_some();
                calls.push(RecordedToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    input,
                });
                results.push(RecordedToolResult {
                    tool_use_id: id.clone(),
                    tool: name,
                    result: parsed,
                });
                result_blocks.push(ContentBlock::ToolResult {
                    tool_use_id: id,
                    content: output,
                    is_error,
                });
            }
            transcript.push(ChatMessage {
                role: Role::Assistant,
                content: response.content,
            });
            transcript.push(ChatMessage {
                role: Role::User,
                content: result_blocks,
            });
        }

        warn!(
            user_id,
            conversation_id,
            rounds = MAX_TOOL_ROUNDS,
            "Tool round budget exhausted; returning last text"
        );
        Ok((final_text, calls, results))
    }

    async fn after_reply(&self, user_id: i32, conversation_id: i32) {
        if let Err(err) = self.gate.increment(user_id, Feature::Messages).await {
            warn!(user_id, error = %err, "Failed to record message usage");
        }
        match self
            .conversations
            .count_messages(conversation_id, Some(Role::User))
            .await
        {
            Ok(message_count) => self.events.emit(Event::MessageSent {
                user_id,
                conversation_id,
                message_count,
            }),
            Err(err) => warn!(user_id, conversation_id, error = %err, "Skipped message.sent"),
        }
    }

    pub async fn system_prompt(&self, user_id: i32) -> Result<String> {
        let mut sections = vec![ADVISOR_PERSONA.to_string()];

        if let Some(profile) = self.profiles.profile(user_id).await? {
            sections.push(communication_style(profile.communication_level.as_deref()).to_string());
            sections.push(advisor_tone(profile.advisor_tone.as_deref()).to_string());
            sections.push(profile_section(&profile));
        }

        let plans = self.profiles.active_plans(user_id).await?;
        if !plans.is_empty() {
            let mut section = "Active Financial Plans:".to_string();
            for plan in &plans {
                section.push_str(&format!("\n- {} ({})", plan.title, plan.plan_type));
            }
            sections.push(section);
        }

        let insights = self
            .insights
            .list_by_status(
                user_id,
                &[InsightStatus::Delivered, InsightStatus::Accepted],
                RECENT_INSIGHTS,
            )
            .await?;
        if !insights.is_empty() {
            let mut section =
                "Recent Advisor Insights (reference these naturally if relevant):".to_string();
            for insight in &insights {
                section.push_str(&format!(
                    "\n- [{}] {}: {}",
                    insight.insight_type.as_str(),
                    insight.title,
                    insight.body
                ));
            }
            sections.push(section);
        }

        let facts = self.facts.list_facts(user_id, MEMORY_PROMPT_LIMIT).await?;
        if !facts.is_empty() {
            let mut section =
                "Behavioral Memory (what you know about this user from past interactions):"
                    .to_string();
            for fact in &facts {
                section.push_str(&format!("\n- {}: {}", fact.key, fact.value));
            }
            sections.push(section);
        }

        let summaries = self
            .memory
            .conversation_summaries(user_id, PROMPT_SUMMARIES)
            .await?;
        if !summaries.is_empty() {
            let mut section = "Previous Conversation Summaries (use for continuity):".to_string();
            for summary in &summaries {
                section.push_str(&format!("\n- {}", summary.summary));
                if !summary.key_facts.is_empty() {
                    section.push_str(&format!(" Key facts: {}.", summary.key_facts.join(", ")));
                }
                if !summary.action_items.is_empty() {
                    section.push_str(&format!(
                        " Action items: {}.",
                        summary.action_items.join(", ")
                    ));
                }
            }
            sections.push(section);
        }

        Ok(sections.join("\n\n"))
    }

    pub async fn list_conversations(&self, user_id: i32, limit: usize) -> Result<Vec<Conversation>> {
        self.conversations.list(user_id, limit).await
    }

    pub async fn get_messages(
        &self,
        user_id: i32,
        conversation_id: i32,
    ) -> Result<(Conversation, Vec<Message>)> {
        let conversation = self
            .conversations
            .get(user_id, conversation_id)
            .await?
            .ok_or_else(|| WealthWiseError::NotFound("conversation".to_string()))?;
        let messages = self.conversations.messages(conversation_id).await?;
        Ok((conversation, messages))
    }

    pub async fn delete_conversation(&self, user_id: i32, conversation_id: i32) -> Result<()> {
        self.conversations.delete(user_id, conversation_id).await?;
        info!(user_id, conversation_id, "Conversation deleted");
        Ok(())
    }
}
