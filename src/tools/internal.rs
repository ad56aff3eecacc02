use serde_json::{json, Value};

use crate::error::{Result, WealthWiseError};
use crate::insights::InsightStore;
use crate::memory::{FactSource, MemoryStore};
use crate::profile::ProfileStore;
use crate::services::entitlement::EntitlementGate;
use crate::tools::ToolContext;

const PLAN_SUMMARY_CHARS: usize = 500;
const MEMORY_LIMIT: usize = 20;
const PENDING_INSIGHT_LIMIT: usize = 5;

pub(super) async fn financial_plans(ctx: Option<&ToolContext>) -> Result<Value> {
    let Some(ctx) = ctx else {
        return Ok(json!({ "plans": [], "message": "No session context" }));
    };
    let plans = ProfileStore::new(ctx.db.clone())
        .active_plans(ctx.user_id)
        .await?;
    let items: Vec<Value> = plans
        .iter()
        .map(|plan| {
            let summary: String = plan
                .summary
                .as_deref()
                .unwrap_or_default()
                .chars()
                .take(PLAN_SUMMARY_CHARS)
                .collect();
            json!({
                "id": plan.id,
                "title": plan.title,
                "type": plan.plan_type,
                "created_at": plan.created_at,
                "summary": summary,
            })
        })
        .collect();
    Ok(json!({ "total": items.len(), "plans": items }))
}

pub(super) async fn user_memory(ctx: Option<&ToolContext>) -> Result<Value> {
    let Some(ctx) = ctx else {
        return Ok(json!({ "memories": [] }));
    };
    let facts = MemoryStore::new(ctx.db.clone())
        .list_facts(ctx.user_id, MEMORY_LIMIT)
        .await?;
    let memories: Vec<Value> = facts
        .iter()
        .map(|fact| json!({ "key": fact.key, "value": fact.value, "source": fact.source }))
        .collect();
    Ok(json!({ "memories": memories }))
}

pub(super) async fn save_user_memory(
    ctx: Option<&ToolContext>,
    key: &str,
    value: &str,
) -> Result<Value> {
    let Some(ctx) = ctx else {
        return Ok(json!({ "status": "error", "message": "No session context" }));
    };
    MemoryStore::new(ctx.db.clone())
        .merge_upsert(ctx.user_id, key.trim(), value.trim(), FactSource::Explicit, 1.0)
        .await?;
    Ok(json!({ "status": "saved", "key": key.trim() }))
}

pub(super) async fn active_alerts(ctx: Option<&ToolContext>) -> Result<Value> {
    let Some(ctx) = ctx else {
        return Ok(json!({ "alerts": [] }));
    };
    let alerts = ProfileStore::new(ctx.db.clone())
        .active_alerts(ctx.user_id)
        .await?;
    let items: Vec<Value> = alerts
        .iter()
        .map(|alert| {
            json!({
                "symbol": alert.symbol,
                "condition": alert.condition,
                "target_price": alert.target_price,
                "triggered": alert.triggered,
            })
        })
        .collect();
    Ok(json!({ "total": items.len(), "alerts": items }))
}

pub(super) async fn usage_summary(ctx: Option<&ToolContext>) -> Result<Value> {
    let Some(ctx) = ctx else {
        return Ok(json!({ "error": "No session context" }));
    };
    let summary = EntitlementGate::new(ctx.db.clone())
        .usage_summary(ctx.user_id)
        .await?;
    serde_json::to_value(summary).map_err(|e| WealthWiseError::Serialization(e.to_string()))
}

/// Read-only view; listing here does not mark anything delivered.
pub(super) async fn pending_insights(ctx: Option<&ToolContext>) -> Result<Value> {
    let Some(ctx) = ctx else {
        return Ok(json!({ "insights": [] }));
    };
    let insights = InsightStore::new(ctx.db.clone())
        .list_open(ctx.user_id, Some(PENDING_INSIGHT_LIMIT))
        .await?;
    let items: Vec<Value> = insights
        .iter()
        .map(|insight| {
            json!({
                "type": insight.insight_type,
                "title": insight.title,
                "body": insight.body,
                "urgency": insight.urgency,
                "confidence": insight.confidence,
            })
        })
        .collect();
    Ok(json!({ "total": items.len(), "insights": items }))
}
