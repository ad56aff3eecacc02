use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};

use crate::db::{db_err, now_ms, Database};
use crate::error::{Result, WealthWiseError};

mod schema;
use schema::insights;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightType {
    Opportunity,
    Warning,
    Suggestion,
    Milestone,
    Nudge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightStatus {
    Pending,
    Delivered,
    Accepted,
    Dismissed,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }

            pub fn parse(value: &str) -> Option<Self> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Some($ty::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

text_enum!(InsightType {
    Opportunity => "opportunity",
    Warning => "warning",
    Suggestion => "suggestion",
    Milestone => "milestone",
    Nudge => "nudge",
});

text_enum!(Urgency {
    Critical => "critical",
    High => "high",
    Medium => "medium",
    Low => "low",
});

text_enum!(Impact {
    Low => "low",
    Medium => "medium",
    High => "high",
});

text_enum!(InsightStatus {
    Pending => "pending",
    Delivered => "delivered",
    Accepted => "accepted",
    Dismissed => "dismissed",
});

impl Urgency {
    /// Sort rank, most urgent first.
    pub fn rank(&self) -> u8 {
        match self {
            Urgency::Critical => 0,
            Urgency::High => 1,
            Urgency::Medium => 2,
            Urgency::Low => 3,
        }
    }
}

impl InsightStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, InsightStatus::Pending | InsightStatus::Delivered)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub id: i32,
    pub user_id: i32,
    pub insight_type: InsightType,
    pub title: String,
    pub body: String,
    pub reasoning: String,
    pub confidence: f64,
    pub urgency: Urgency,
    pub impact: Impact,
    pub actions: Vec<String>,
    pub trigger: String,
    pub status: InsightStatus,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub resolved_at: Option<i64>,
}

/// A validated insight ready to be stored as `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub insight_type: InsightType,
    pub title: String,
    pub body: String,
    pub reasoning: String,
    pub confidence: f64,
    pub urgency: Urgency,
    pub impact: Impact,
    pub actions: Vec<String>,
    pub trigger: String,
}

#[derive(Queryable)]
struct InsightRow {
    id: i32,
    user_id: i32,
    insight_type: String,
    title: String,
    body: String,
    reasoning: String,
    confidence: f64,
    urgency: String,
    impact: String,
    actions: String,
    trigger_label: String,
    status: String,
    created_at: i64,
    delivered_at: Option<i64>,
    resolved_at: Option<i64>,
}

#[derive(Insertable)]
#[diesel(table_name = insights)]
struct NewInsight<'a> {
    user_id: i32,
    insight_type: &'a str,
    title: &'a str,
    body: &'a str,
    reasoning: &'a str,
    confidence: f64,
    urgency: &'a str,
    impact: &'a str,
    actions: &'a str,
    trigger_label: &'a str,
    status: &'a str,
    created_at: i64,
}

const OPEN_STATUSES: [&str; 2] = ["pending", "delivered"];

pub struct InsightStore {
    db: Database,
}

impl InsightStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stores every draft as a new `pending` row in one transaction. Never touches
    /// existing insights.
    pub async fn insert_pending(&self, user_id: i32, drafts: &[InsightDraft]) -> Result<Vec<Insight>> {
        if drafts.is_empty() {
            return Ok(Vec::new());
        }
        let now = now_ms();
        let actions = drafts
            .iter()
            .map(|draft| serde_json::to_string(&draft.actions))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| WealthWiseError::Serialization(e.to_string()))?;
        let new_rows: Vec<NewInsight<'_>> = drafts
            .iter()
            .zip(&actions)
            .map(|(draft, actions)| NewInsight {
                user_id,
                insight_type: draft.insight_type.as_str(),
                title: &draft.title,
                body: &draft.body,
                reasoning: &draft.reasoning,
                confidence: draft.confidence,
                urgency: draft.urgency.as_str(),
                impact: draft.impact.as_str(),
                actions,
                trigger_label: &draft.trigger,
                status: InsightStatus::Pending.as_str(),
                created_at: now,
            })
            .collect();

        let mut conn = self.db.conn().await?;
        let rows: Vec<InsightRow> = conn
            .transaction::<_, diesel::result::Error, _>(|conn| {
                async move {
                    let mut rows = Vec::with_capacity(new_rows.len());
                    for new in &new_rows {
                        let row: InsightRow = diesel::insert_into(insights::table)
                            .values(new)
                            .returning(insights::all_columns)
                            .get_result(conn)
                            .await?;
                        rows.push(row);
                    }
                    Ok(rows)
                }
                .scope_boxed()
            })
            .await
            .map_err(db_err)?;
        rows.into_iter().map(map_row).collect()
    }

    /// Insights still awaiting a decision, newest first.
    pub async fn list_open(&self, user_id: i32, limit: Option<usize>) -> Result<Vec<Insight>> {
        let mut conn = self.db.conn().await?;
        let mut query = insights::table
            .filter(insights::user_id.eq(user_id))
            .filter(insights::status.eq_any(OPEN_STATUSES))
            .order((insights::created_at.desc(), insights::id.desc()))
            .into_boxed();
        if let Some(limit) = limit {
            query = query.limit(limit as i64);
        }
        let rows: Vec<InsightRow> = query.load(&mut conn).await.map_err(db_err)?;
        rows.into_iter().map(map_row).collect()
    }

    pub async fn list_by_status(
        &self,
        user_id: i32,
        statuses: &[InsightStatus],
        limit: usize,
    ) -> Result<Vec<Insight>> {
        let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let mut conn = self.db.conn().await?;
        let rows: Vec<InsightRow> = insights::table
            .filter(insights::user_id.eq(user_id))
            .filter(insights::status.eq_any(statuses))
            .order((insights::created_at.desc(), insights::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        rows.into_iter().map(map_row).collect()
    }

    /// Moves the given ids from `pending` to `delivered`; rows in any other state are left alone.
    pub async fn mark_delivered(&self, user_id: i32, ids: &[i32], at: i64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.db.conn().await?;
        diesel::update(
            insights::table
                .filter(insights::user_id.eq(user_id))
                .filter(insights::id.eq_any(ids))
                .filter(insights::status.eq(InsightStatus::Pending.as_str())),
        )
        .set((
            insights::status.eq(InsightStatus::Delivered.as_str()),
            insights::delivered_at.eq(Some(at)),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err)
    }

    /// Terminal transition from `pending`/`delivered`. Missing, foreign or already
    /// resolved insights are reported as not found.
    pub async fn resolve(
        &self,
        user_id: i32,
        insight_id: i32,
        status: InsightStatus,
    ) -> Result<Insight> {
        if status.is_open() {
            return Err(WealthWiseError::Runtime(format!(
                "'{}' is not a terminal insight status",
                status.as_str()
            )));
        }
        let now = now_ms();
        let mut conn = self.db.conn().await?;
        let updated = diesel::update(
            insights::table
                .filter(insights::id.eq(insight_id))
                .filter(insights::user_id.eq(user_id))
                .filter(insights::status.eq_any(OPEN_STATUSES)),
        )
        .set((
            insights::status.eq(status.as_str()),
            insights::resolved_at.eq(Some(now)),
        ))
        .execute(&mut conn)
        .await
        .map_err(db_err)?;
        if updated == 0 {
            return Err(WealthWiseError::NotFound("insight".to_string()));
        }
        let row: InsightRow = insights::table
            .filter(insights::id.eq(insight_id))
            .first(&mut conn)
            .await
            .map_err(db_err)?;
        map_row(row)
    }

    pub async fn count(&self, user_id: i32) -> Result<i64> {
        let mut conn = self.db.conn().await?;
        insights::table
            .filter(insights::user_id.eq(user_id))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(db_err)
    }
}

fn map_row(row: InsightRow) -> Result<Insight> {
    let corrupt = |field: &str, value: &str| {
        WealthWiseError::Serialization(format!("stored insight has invalid {field} '{value}'"))
    };
    Ok(Insight {
        id: row.id,
        user_id: row.user_id,
        insight_type: InsightType::parse(&row.insight_type)
            .ok_or_else(|| corrupt("type", &row.insight_type))?,
        title: row.title,
        body: row.body,
        reasoning: row.reasoning,
        confidence: row.confidence,
        urgency: Urgency::parse(&row.urgency).ok_or_else(|| corrupt("urgency", &row.urgency))?,
        impact: Impact::parse(&row.impact).ok_or_else(|| corrupt("impact", &row.impact))?,
        actions: serde_json::from_str(&row.actions)
            .map_err(|e| WealthWiseError::Serialization(e.to_string()))?,
        trigger: row.trigger_label,
        status: InsightStatus::parse(&row.status).ok_or_else(|| corrupt("status", &row.status))?,
        created_at: row.created_at,
        delivered_at: row.delivered_at,
        resolved_at: row.resolved_at,
    })
}
