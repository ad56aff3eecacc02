use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{error, info, warn};

use crate::conversations::ConversationStore;
use crate::db::{now_ms, Database};
use crate::error::Result;
use crate::insights::{
    Impact, Insight, InsightDraft, InsightStatus, InsightStore, InsightType, Urgency,
};
use crate::interfaces::providers::{
    ChatMessage, CompletionClient, CompletionRequest, MarketDataProvider,
};
use crate::memory::MemoryStore;
use crate::profile::ProfileStore;
use crate::services::entitlement::{EntitlementGate, Feature};
use crate::services::events::{Event, EventHandler};
use crate::services::structured::parse_json_output;

const MAX_INSIGHTS_PER_RUN: usize = 3;
const PENDING_READ_LIMIT: usize = 10;
const RECENT_CONVERSATIONS: usize = 5;
const MEMORY_CONTEXT_LIMIT: usize = 50;
const GENERATION_MAX_TOKENS: u32 = 1500;
const MARKET_BENCHMARK: &str = "SPY";

const DEFAULT_TITLE: &str = "Financial Insight";
const DEFAULT_CONFIDENCE: f64 = 0.7;
const DEFAULT_TRIGGER: &str = "profile_analysis";

pub struct InsightGenerator {
    completion: Arc<dyn CompletionClient>,
    market: Arc<dyn MarketDataProvider>,
    store: InsightStore,
    profiles: ProfileStore,
    conversations: ConversationStore,
    memory: MemoryStore,
    gate: EntitlementGate,
    model: Option<String>,
}

impl InsightGenerator {
    pub fn new(
        db: Database,
        completion: Arc<dyn CompletionClient>,
        market: Arc<dyn MarketDataProvider>,
        model: Option<String>,
    ) -> Self {
        Self {
            completion,
            market,
            store: InsightStore::new(db.clone()),
            profiles: ProfileStore::new(db.clone()),
            conversations: ConversationStore::new(db.clone()),
            memory: MemoryStore::new(db.clone()),
            gate: EntitlementGate::new(db),
            model,
        }
    }

    /// One completion call, then up to three new `pending` insights.
    ///
    /// Output that is not a JSON array yields an empty list and writes nothing.
    pub async fn generate(&self, user_id: i32) -> Result<Vec<Insight>> {
        let system = self.build_prompt(user_id).await?;
        let request = CompletionRequest::new(
            system,
            vec![ChatMessage::user(
                "Generate financial insights for me based on my profile and current situation.",
            )],
            GENERATION_MAX_TOKENS,
        )
        .with_model(self.model.clone());
        let response = self.completion.complete(request).await?;
        let text = response.text();

        let Some(drafts) = parse_insights(&text) else {
            error!(user_id, response = %text, "Failed to parse insight response");
            return Ok(Vec::new());
        };
        let created = self.store.insert_pending(user_id, &drafts).await?;
        info!(user_id, count = created.len(), "Generated insights");
        Ok(created)
    }

    /// User-requested generation, metered against the daily `insights` quota.
    pub async fn generate_on_demand(&self, user_id: i32) -> Result<Vec<Insight>> {
        self.gate.require(user_id, Feature::Insights).await?;
        let insights = self.generate(user_id).await?;
        self.gate.increment(user_id, Feature::Insights).await?;
        Ok(insights)
    }

    /// Open insights, most urgent first, then newest. Returned `pending` items become
    /// `delivered`.
    pub async fn get_pending(&self, user_id: i32) -> Result<Vec<Insight>> {
        let mut open = self.store.list_open(user_id, None).await?;
        open.sort_by(|a, b| {
            a.urgency
                .rank()
                .cmp(&b.urgency.rank())
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        open.truncate(PENDING_READ_LIMIT);

        let pending_ids: Vec<i32> = open
            .iter()
            .filter(|insight| insight.status == InsightStatus::Pending)
            .map(|insight| insight.id)
            .collect();
        if !pending_ids.is_empty() {
            let delivered_at = now_ms();
            self.store
                .mark_delivered(user_id, &pending_ids, delivered_at)
                .await?;
            for insight in open.iter_mut() {
                if insight.status == InsightStatus::Pending {
                    insight.status = InsightStatus::Delivered;
                    insight.delivered_at = Some(delivered_at);
                }
            }
        }
        Ok(open)
    }

    pub async fn accept(&self, user_id: i32, insight_id: i32) -> Result<Insight> {
        self.store
            .resolve(user_id, insight_id, InsightStatus::Accepted)
            .await
    }

    pub async fn dismiss(&self, user_id: i32, insight_id: i32) -> Result<Insight> {
        self.store
            .resolve(user_id, insight_id, InsightStatus::Dismissed)
            .await
    }

    async fn build_prompt(&self, user_id: i32) -> Result<String> {
        let profile_ctx = match self.profiles.profile(user_id).await? {
            Some(p) => json!({
                "age": p.age,
                "annual_income": p.annual_income,
                "monthly_expenses": p.monthly_expenses,
                "total_savings": p.total_savings,
                "total_debt": p.total_debt,
                "risk_tolerance": p.risk_tolerance,
                "investment_goals": p.investment_goals,
                "experience_level": p.experience_level,
                "investment_timeline": p.investment_timeline,
            })
            .to_string(),
            None => "No financial profile set up yet.".to_string(),
        };

        let plans = self.profiles.active_plans(user_id).await?;
        let plans_ctx = if plans.is_empty() {
            "No active financial plans.".to_string()
        } else {
            Value::Array(
                plans
                    .iter()
                    .map(|p| json!({"id": p.id, "title": p.title, "type": p.plan_type}))
                    .collect(),
            )
            .to_string()
        };

        let conversations = self
            .conversations
            .list(user_id, RECENT_CONVERSATIONS)
            .await?;
        let conversations_ctx = if conversations.is_empty() {
            "No recent conversations.".to_string()
        } else {
            json!(conversations.iter().map(|c| c.title.as_str()).collect::<Vec<_>>()).to_string()
        };

        let facts = self
            .memory
            .list_facts(user_id, MEMORY_CONTEXT_LIMIT)
            .await?;
        let memory_ctx = if facts.is_empty() {
            "No behavioral memory yet.".to_string()
        } else {
            Value::Array(
                facts
                    .iter()
                    .map(|f| json!({"key": f.key, "value": f.value, "source": f.source}))
                    .collect(),
            )
            .to_string()
        };

        let market_ctx = match self.market.quote(MARKET_BENCHMARK).await {
            Ok(quote) => json!({
                "sp500_price": quote.get("price"),
                "sp500_change_pct": quote.get("change_percent"),
            })
            .to_string(),
            Err(err) => {
                warn!(user_id, error = %err, "Market snapshot unavailable");
                "Market data unavailable.".to_string()
            }
        };

        Ok(format!(
            "You are a proactive AI financial advisor. Analyze the user's financial situation and generate 1-3 actionable insights.

USER PROFILE:
{profile_ctx}

ACTIVE FINANCIAL PLANS:
{plans_ctx}

RECENT CONVERSATION TOPICS:
{conversations_ctx}

BEHAVIORAL MEMORY:
{memory_ctx}

CURRENT MARKET SNAPSHOT:
{market_ctx}

Generate insights that are specific, actionable, and relevant to this user.

Return a JSON array of 1-3 insights. Each insight must have:
- type: one of \"opportunity\", \"warning\", \"suggestion\", \"milestone\", \"nudge\"
- title: short headline (max 80 chars)
- body: 2-3 sentence explanation
- reasoning: why this insight is relevant to this specific user
- confidence: float 0.0-1.0
- urgency: one of \"low\", \"medium\", \"high\", \"critical\"
- impact: one of \"low\", \"medium\", \"high\"
- trigger: what data point triggered this insight
- actions: JSON array of 1-2 suggested action strings

Return ONLY the JSON array, no other text."
        ))
    }
}

/// Parses the model's insight array. `None` when the output is not a JSON array;
/// non-object entries are skipped and at most three drafts are kept.
pub fn parse_insights(text: &str) -> Option<Vec<InsightDraft>> {
    let Ok(Value::Array(items)) = parse_json_output(text) else {
        return None;
    };
    Some(
        items
            .iter()
            .filter_map(Value::as_object)
            .take(MAX_INSIGHTS_PER_RUN)
            .map(draft_from)
            .collect(),
    )
}

fn draft_from(data: &Map<String, Value>) -> InsightDraft {
    let text = |key: &str| data.get(key).and_then(Value::as_str).map(str::trim);
    let confidence = match data.get("confidence") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|c| c.is_finite())
    .unwrap_or(DEFAULT_CONFIDENCE)
    .clamp(0.0, 1.0);
    let actions = match data.get("actions") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    };

    InsightDraft {
        insight_type: text("type")
            .and_then(InsightType::parse)
            .unwrap_or(InsightType::Suggestion),
        title: text("title")
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TITLE)
            .to_string(),
        body: text("body").unwrap_or_default().to_string(),
        reasoning: text("reasoning").unwrap_or_default().to_string(),
        confidence,
        urgency: text("urgency")
            .and_then(Urgency::parse)
            .unwrap_or(Urgency::Medium),
        impact: text("impact").and_then(Impact::parse).unwrap_or(Impact::Medium),
        actions,
        trigger: text("trigger")
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TRIGGER)
            .to_string(),
    }
}

/// Runs generation on every Nth user message of a conversation and on plan/alert events.
pub struct InsightTrigger {
    generator: Arc<InsightGenerator>,
    cadence: i64,
}

impl InsightTrigger {
    pub fn new(generator: Arc<InsightGenerator>, cadence: i64) -> Self {
        Self {
            generator,
            cadence: cadence.max(1),
        }
    }

    pub fn should_generate(&self, event: &Event) -> bool {
        match event {
            Event::MessageSent { message_count, .. } => {
                *message_count > 0 && message_count % self.cadence == 0
            }
            Event::PlanCreated { .. } | Event::AlertTriggered { .. } => true,
        }
    }
}

#[async_trait]
impl EventHandler for InsightTrigger {
    fn name(&self) -> &str {
        "insight_trigger"
    }

    async fn handle(&self, event: &Event) -> Result<()> {
        if !self.should_generate(event) {
            return Ok(());
        }
        let user_id = event.user_id();
        let created = self.generator.generate(user_id).await?;
        info!(
            user_id,
            event = event.name(),
            count = created.len(),
            "Auto-generated insights"
        );
        Ok(())
    }
}
