use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::conversations::{Conversation, Message};
use crate::db::Database;
use crate::error::{Result, WealthWiseError};
use crate::factories::advisor_factory::AdvisorFactory;
use crate::insights::Insight;
use crate::memory::{FactSource, MemoryFact, MemoryStore, MergeOutcome};
use crate::profile::{FinancialPlan, FinancialProfile, PriceAlert, ProfileStore};
use crate::services::chat::{ChatReply, ConversationOrchestrator};
use crate::services::entitlement::{Entitlement, EntitlementGate, Feature, UsageSummary};
use crate::services::events::{Event, EventBus};
use crate::services::insights::InsightGenerator;
use crate::services::memory::{ConversationSummary, MemoryExtractor};

const ALERT_CONDITIONS: [&str; 2] = ["above", "below"];

/// Entry point for callers: one handle over the advisory pipeline and the records it reads.
pub struct Advisor {
    events: Arc<EventBus>,
    orchestrator: ConversationOrchestrator,
    insights: Arc<InsightGenerator>,
    memory: Arc<MemoryExtractor>,
    gate: EntitlementGate,
    profiles: ProfileStore,
    facts: MemoryStore,
}

impl Advisor {
    pub fn new(
        db: Database,
        events: Arc<EventBus>,
        orchestrator: ConversationOrchestrator,
        insights: Arc<InsightGenerator>,
        memory: Arc<MemoryExtractor>,
    ) -> Self {
        Self {
            events,
            orchestrator,
            insights,
            memory,
            gate: EntitlementGate::new(db.clone()),
            profiles: ProfileStore::new(db.clone()),
            facts: MemoryStore::new(db),
        }
    }

    pub async fn from_config(config: Config) -> Result<Self> {
        AdvisorFactory::create_from_config(config).await
    }

    pub async fn from_config_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::from_file(path)?;
        Self::from_config(config).await
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Waits for background handlers spawned so far.
    pub async fn wait_idle(&self) {
        self.events.wait_idle().await
    }

    pub async fn send_message(
        &self,
        user_id: i32,
        conversation_id: Option<i32>,
        text: &str,
    ) -> Result<ChatReply> {
        self.orchestrator
            .send_message(user_id, conversation_id, text)
            .await
    }

    pub async fn list_conversations(&self, user_id: i32, limit: usize) -> Result<Vec<Conversation>> {
        self.orchestrator.list_conversations(user_id, limit).await
    }

    pub async fn get_messages(
        &self,
        user_id: i32,
        conversation_id: i32,
    ) -> Result<(Conversation, Vec<Message>)> {
        self.orchestrator.get_messages(user_id, conversation_id).await
    }

    pub async fn delete_conversation(&self, user_id: i32, conversation_id: i32) -> Result<()> {
        self.orchestrator
            .delete_conversation(user_id, conversation_id)
            .await
    }

    pub async fn pending_insights(&self, user_id: i32) -> Result<Vec<Insight>> {
        self.insights.get_pending(user_id).await
    }

    pub async fn generate_insights(&self, user_id: i32) -> Result<Vec<Insight>> {
        self.insights.generate_on_demand(user_id).await
    }

    pub async fn accept_insight(&self, user_id: i32, insight_id: i32) -> Result<Insight> {
        self.insights.accept(user_id, insight_id).await
    }

    pub async fn dismiss_insight(&self, user_id: i32, insight_id: i32) -> Result<Insight> {
        self.insights.dismiss(user_id, insight_id).await
    }

    pub async fn check_entitlement(&self, user_id: i32, feature: Feature) -> Result<Entitlement> {
        self.gate.check(user_id, feature).await
    }

    pub async fn usage_summary(&self, user_id: i32) -> Result<UsageSummary> {
        self.gate.usage_summary(user_id).await
    }

    pub async fn memory_facts(&self, user_id: i32, limit: usize) -> Result<Vec<MemoryFact>> {
        self.facts.list_facts(user_id, limit).await
    }

    pub async fn remember(&self, user_id: i32, key: &str, value: &str) -> Result<MergeOutcome> {
        self.facts
            .merge_upsert(user_id, key.trim(), value.trim(), FactSource::Explicit, 1.0)
            .await
    }

    pub async fn conversation_summaries(
        &self,
        user_id: i32,
        limit: usize,
    ) -> Result<Vec<ConversationSummary>> {
        self.memory.conversation_summaries(user_id, limit).await
    }

    pub async fn save_profile(&self, profile: &FinancialProfile) -> Result<()> {
        self.profiles.save_profile(profile).await
    }

    pub async fn set_subscription_status(&self, user_id: i32, status: &str) -> Result<()> {
        self.profiles.set_subscription_status(user_id, status).await
    }

    /// Metered by the `plans` quota; announces `plan.created`. Once the plan is stored,
    /// a failure to record usage is logged rather than returned.
    pub async fn create_plan(
        &self,
        user_id: i32,
        title: &str,
        plan_type: &str,
        summary: Option<&str>,
    ) -> Result<FinancialPlan> {
        self.gate.require(user_id, Feature::Plans).await?;
        let plan = self
            .profiles
            .create_plan(user_id, title, plan_type, summary)
            .await?;
        if let Err(err) = self.gate.increment(user_id, Feature::Plans).await {
            warn!(user_id, plan_id = plan.id, error = %err, "Failed to record plan usage");
        }
        info!(user_id, plan_id = plan.id, "Financial plan created");
        self.events.emit(Event::PlanCreated {
            user_id,
            plan_title: plan.title.clone(),
        });
        Ok(plan)
    }

    /// Metered by the `alerts` quota.
    pub async fn create_alert(
        &self,
        user_id: i32,
        symbol: &str,
        condition: &str,
        target_price: f64,
    ) -> Result<PriceAlert> {
        let condition = condition.trim().to_ascii_lowercase();
        if !ALERT_CONDITIONS.contains(&condition.as_str()) {
            return Err(WealthWiseError::Runtime(format!(
                "alert condition must be 'above' or 'below', got '{condition}'"
            )));
        }
        if symbol.trim().is_empty() {
            return Err(WealthWiseError::Runtime("alert symbol must not be empty".to_string()));
        }
        self.gate.require(user_id, Feature::Alerts).await?;
        let alert = self
            .profiles
            .create_alert(user_id, symbol, &condition, target_price)
            .await?;
        if let Err(err) = self.gate.increment(user_id, Feature::Alerts).await {
            warn!(user_id, alert_id = alert.id, error = %err, "Failed to record alert usage");
        }
        Ok(alert)
    }

    /// Marks the alert as fired and announces `alert.triggered`.
    pub async fn trigger_alert(&self, user_id: i32, alert_id: i32) -> Result<PriceAlert> {
        let alert = self.profiles.mark_alert_triggered(user_id, alert_id).await?;
        info!(user_id, alert_id, symbol = %alert.symbol, "Price alert triggered");
        self.events.emit(Event::AlertTriggered {
            user_id,
            symbol: alert.symbol.clone(),
        });
        Ok(alert)
    }
}
