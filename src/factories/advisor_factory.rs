use std::sync::Arc;
use std::time::Duration;

use crate::client::Advisor;
use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, WealthWiseError};
use crate::interfaces::providers::{CompletionClient, MarketDataProvider};
use crate::providers::market::HttpMarketDataProvider;
use crate::providers::openai::OpenAiProvider;
use crate::providers::timed::TimedCompletionClient;
use crate::services::chat::ConversationOrchestrator;
use crate::services::events::{EventBus, ALERT_TRIGGERED, MESSAGE_SENT, PLAN_CREATED};
use crate::services::follow_ups::FollowUpSuggester;
use crate::services::insights::{InsightGenerator, InsightTrigger};
use crate::services::memory::{MemoryExtractor, MemoryRecorder};
use crate::tools::ToolExecutor;

pub struct AdvisorFactory;

impl AdvisorFactory {
    pub async fn create_from_config(config: Config) -> Result<Advisor> {
        let config = config.resolve_env();
        let openai = config.openai.clone().unwrap_or_default();
        let api_key = openai
            .api_key
            .filter(|key| !key.trim().is_empty())
            .or_else(|| {
                // local OpenAI-compatible servers accept any key
                openai.base_url.as_ref().map(|_| "ollama".to_string())
            })
            .ok_or_else(|| WealthWiseError::Config("Missing OpenAI API key".to_string()))?;
        let provider = OpenAiProvider::new(api_key, Some(config.model()), openai.base_url);
        let completion: Arc<dyn CompletionClient> = Arc::new(TimedCompletionClient::new(
            Arc::new(provider),
            Duration::from_secs(config.completion_timeout_seconds()),
        ));

        let market_cfg = config.market_data.clone().unwrap_or_default();
        let market_url = market_cfg
            .base_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| WealthWiseError::Config("Missing market_data.base_url".to_string()))?;
        let market: Arc<dyn MarketDataProvider> = Arc::new(HttpMarketDataProvider::new(
            market_url,
            market_cfg.timeout_seconds,
        ));

        let db = Database::open(config.sqlite_path()).await?;
        Ok(Self::create_with_providers(&config, db, completion, market))
    }

    /// Wires every service around the given adapters and registers the event handlers.
    pub fn create_with_providers(
        config: &Config,
        db: Database,
        completion: Arc<dyn CompletionClient>,
        market: Arc<dyn MarketDataProvider>,
    ) -> Advisor {
        let fast_model = Some(config.fast_model());
        let memory = Arc::new(MemoryExtractor::new(
            db.clone(),
            completion.clone(),
            fast_model.clone(),
            config.summary_threshold(),
            config.summary_char_budget(),
        ));
        let insights = Arc::new(InsightGenerator::new(
            db.clone(),
            completion.clone(),
            market.clone(),
            fast_model.clone(),
        ));

        let mut bus = EventBus::new();
        let trigger = Arc::new(InsightTrigger::new(insights.clone(), config.insight_cadence()));
        bus.subscribe(MESSAGE_SENT, trigger.clone());
        bus.subscribe(PLAN_CREATED, trigger.clone());
        bus.subscribe(ALERT_TRIGGERED, trigger);
        bus.subscribe(
            MESSAGE_SENT,
            Arc::new(MemoryRecorder::new(db.clone(), memory.clone())),
        );
        bus.subscribe(
            MESSAGE_SENT,
            Arc::new(FollowUpSuggester::new(
                db.clone(),
                completion.clone(),
                fast_model,
                config.follow_up_max_tokens(),
            )),
        );
        let events = Arc::new(bus);

        let orchestrator = ConversationOrchestrator::new(
            db.clone(),
            completion,
            Arc::new(ToolExecutor::new(market)),
            events.clone(),
            memory.clone(),
        );
        Advisor::new(db, events, orchestrator, insights, memory)
    }
}
