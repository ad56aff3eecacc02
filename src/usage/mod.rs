use diesel::prelude::*;
use diesel::sql_types::{BigInt, Integer, Text};
use diesel_async::RunQueryDsl;
use serde::Serialize;

use crate::db::{db_err, Database};
use crate::error::Result;

mod schema;
use schema::usage_records;

#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    pub user_id: i32,
    pub feature: String,
    pub count: i64,
    pub period_start: i64,
    pub period_end: i64,
}

#[derive(Queryable)]
struct UsageRow {
    _id: i32,
    user_id: i32,
    feature: String,
    count: i64,
    period_start: i64,
    period_end: i64,
}

#[derive(QueryableByName)]
struct CountRow {
    #[diesel(sql_type = BigInt)]
    count: i64,
}

/// Counter rows keyed by (user, feature, period_start).
pub struct UsageStore {
    db: Database,
}

impl UsageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn get(
        &self,
        user_id: i32,
        feature: &str,
        period_start: i64,
    ) -> Result<Option<UsageRecord>> {
        let mut conn = self.db.conn().await?;
        let row: Option<UsageRow> = usage_records::table
            .filter(usage_records::user_id.eq(user_id))
            .filter(usage_records::feature.eq(feature))
            .filter(usage_records::period_start.eq(period_start))
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)?;
        Ok(row.map(|row| UsageRecord {
            user_id: row.user_id,
            feature: row.feature,
            count: row.count,
            period_start: row.period_start,
            period_end: row.period_end,
        }))
    }

    /// Missing row means nothing used in that window.
    pub async fn count(&self, user_id: i32, feature: &str, period_start: i64) -> Result<i64> {
        Ok(self
            .get(user_id, feature, period_start)
            .await?
            .map(|record| record.count)
            .unwrap_or(0))
    }

    /// Creates the window row at 1 or adds 1 in a single statement.
    pub async fn increment(
        &self,
        user_id: i32,
        feature: &str,
        period_start: i64,
        period_end: i64,
    ) -> Result<i64> {
        let mut conn = self.db.conn().await?;
        let row: CountRow = diesel::sql_query(
            "INSERT INTO usage_records (user_id, feature, count, period_start, period_end)
             VALUES (?1, ?2, 1, ?3, ?4)
             ON CONFLICT(user_id, feature, period_start) DO UPDATE SET count = count + 1
             RETURNING count",
        )
        .bind::<Integer, _>(user_id)
        .bind::<Text, _>(feature)
        .bind::<BigInt, _>(period_start)
        .bind::<BigInt, _>(period_end)
        .get_result(&mut conn)
        .await
        .map_err(db_err)?;
        Ok(row.count)
    }
}
