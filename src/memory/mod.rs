use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{db_err, now_ms, Database};
use crate::error::Result;

mod schema;
use schema::user_memory;

/// Keys under this prefix hold per-conversation summaries, not behavioral facts.
pub const SUMMARY_KEY_PREFIX: &str = "conversation_summary_";

pub fn summary_key(conversation_id: i32) -> String {
    format!("{SUMMARY_KEY_PREFIX}{conversation_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactSource {
    Conversation,
    Explicit,
    Summary,
}

impl FactSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactSource::Conversation => "conversation",
            FactSource::Explicit => "explicit",
            FactSource::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryFact {
    pub id: i32,
    pub user_id: i32,
    pub key: String,
    pub value: String,
    pub source: String,
    pub confidence: f64,
    pub created_at: i64,
    pub last_updated: i64,
}

#[derive(Queryable)]
struct MemoryRow {
    id: i32,
    user_id: i32,
    key: String,
    value: String,
    source: String,
    confidence: f64,
    created_at: i64,
    last_updated: i64,
}

#[derive(Insertable)]
#[diesel(table_name = user_memory)]
struct NewMemory<'a> {
    user_id: i32,
    key: &'a str,
    value: &'a str,
    source: &'a str,
    confidence: f64,
    created_at: i64,
    last_updated: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Appended,
    Unchanged,
}

/// Union of `existing` and `incoming`, or `None` when `incoming` is already contained.
pub fn merge_value(existing: &str, incoming: &str) -> Option<String> {
    if existing.contains(incoming) {
        None
    } else {
        Some(format!("{existing}, {incoming}"))
    }
}

pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(&self, user_id: i32, key: &str) -> Result<Option<MemoryFact>> {
        let mut conn = self.db.conn().await?;
        let row: Option<MemoryRow> = user_memory::table
            .filter(user_memory::user_id.eq(user_id))
            .filter(user_memory::key.eq(key))
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(row.map(map_row))
    }

    /// Inserts a new fact or appends novel text to an existing one.
    pub async fn merge_upsert(
        &self,
        user_id: i32,
        key: &str,
        value: &str,
        source: FactSource,
        confidence: f64,
    ) -> Result<MergeOutcome> {
        let now = now_ms();
        let existing = self.get(user_id, key).await?;
        let mut conn = self.db.conn().await?;
        match existing {
            Some(fact) => {
                let Some(merged) = merge_value(&fact.value, value) else {
                    return Ok(MergeOutcome::Unchanged);
                };
                diesel::update(user_memory::table.filter(user_memory::id.eq(fact.id)))
                    .set((
                        user_memory::value.eq(merged),
                        user_memory::source.eq(source.as_str()),
                        user_memory::last_updated.eq(now),
                    ))
                    .execute(&mut conn)
                    .await
                    .map_err(db_err)?;
                Ok(MergeOutcome::Appended)
            }
            None => {
                let new = NewMemory {
                    user_id,
                    key,
                    value,
                    source: source.as_str(),
                    confidence,
                    created_at: now,
                    last_updated: now,
                };
                diesel::insert_into(user_memory::table)
                    .values(&new)
                    .on_conflict((user_memory::user_id, user_memory::key))
                    .do_nothing()
                    .execute(&mut conn)
                    .await
                    .map_err(db_err)?;
                Ok(MergeOutcome::Created)
            }
        }
    }

    /// Overwrites the value for `key`, creating it when absent.
    pub async fn put(
        &self,
        user_id: i32,
        key: &str,
        value: &str,
        source: FactSource,
        confidence: f64,
    ) -> Result<()> {
        let now = now_ms();
        let new = NewMemory {
            user_id,
            key,
            value,
            source: source.as_str(),
            confidence,
            created_at: now,
            last_updated: now,
        };
        let mut conn = self.db.conn().await?;
        diesel::insert_into(user_memory::table)
            .values(&new)
            .on_conflict((user_memory::user_id, user_memory::key))
            .do_update()
            .set((
                user_memory::value.eq(value),
                user_memory::source.eq(source.as_str()),
                user_memory::last_updated.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Behavioral facts only; conversation summaries are excluded.
    pub async fn list_facts(&self, user_id: i32, limit: usize) -> Result<Vec<MemoryFact>> {
        let mut conn = self.db.conn().await?;
        let pattern = summary_pattern();
        let rows: Vec<MemoryRow> = user_memory::table
            .filter(user_memory::user_id.eq(user_id))
            .filter(user_memory::key.not_like(pattern).escape('\\'))
            .order((user_memory::last_updated.desc(), user_memory::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(map_row).collect())
    }

    /// Summary entries, newest first.
    pub async fn list_summaries(&self, user_id: i32, limit: usize) -> Result<Vec<MemoryFact>> {
        let mut conn = self.db.conn().await?;
        let pattern = summary_pattern();
        let rows: Vec<MemoryRow> = user_memory::table
            .filter(user_memory::user_id.eq(user_id))
            .filter(user_memory::key.like(pattern).escape('\\'))
            .order((user_memory::last_updated.desc(), user_memory::id.desc()))
            .limit(limit as i64)
            .load(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(rows.into_iter().map(map_row).collect())
    }
}

/// LIKE pattern matching keys that start with the summary prefix; `_` is escaped.
fn summary_pattern() -> String {
    format!("{}%", SUMMARY_KEY_PREFIX.replace('_', "\\_"))
}

fn map_row(row: MemoryRow) -> MemoryFact {
    MemoryFact {
        id: row.id,
        user_id: row.user_id,
        key: row.key,
        value: row.value,
        source: row.source,
        confidence: row.confidence,
        created_at: row.created_at,
        last_updated: row.last_updated,
    }
}
