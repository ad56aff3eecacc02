//! Read/write access to the user-owned records the advisory pipeline consults:
//! financial profile, plans, price alerts and subscription status.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use serde::{Deserialize, Serialize};

use crate::db::{db_err, now_ms, Database};
use crate::error::{Result, WealthWiseError};

mod schema;
use schema::{financial_plans, financial_profiles, price_alerts, subscriptions};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = financial_profiles)]
#[diesel(treat_none_as_null = true)]
pub struct FinancialProfile {
    pub user_id: i32,
    pub age: Option<i32>,
    pub annual_income: Option<f64>,
    pub monthly_expenses: Option<f64>,
    pub total_savings: Option<f64>,
    pub total_debt: Option<f64>,
    pub risk_tolerance: Option<String>,
    pub investment_goals: Option<String>,
    pub portfolio_description: Option<String>,
    pub experience_level: Option<String>,
    pub investment_timeline: Option<String>,
    pub interested_topics: Option<String>,
    pub communication_level: Option<String>,
    pub advisor_tone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Queryable)]
pub struct FinancialPlan {
    pub id: i32,
    pub user_id: i32,
    pub title: String,
    pub plan_type: String,
    pub status: String,
    pub summary: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Queryable)]
pub struct PriceAlert {
    pub id: i32,
    pub user_id: i32,
    pub symbol: String,
    pub condition: String,
    pub target_price: f64,
    pub is_active: bool,
    pub triggered: bool,
    pub created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = financial_plans)]
struct NewPlan<'a> {
    user_id: i32,
    title: &'a str,
    plan_type: &'a str,
    status: &'a str,
    summary: Option<&'a str>,
    created_at: i64,
}

#[derive(Insertable)]
#[diesel(table_name = price_alerts)]
struct NewAlert<'a> {
    user_id: i32,
    symbol: &'a str,
    condition: &'a str,
    target_price: f64,
    is_active: bool,
    triggered: bool,
    created_at: i64,
}

pub const ACTIVE_SUBSCRIPTION: &str = "active";

pub struct ProfileStore {
    db: Database,
}

impl ProfileStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn profile(&self, user_id: i32) -> Result<Option<FinancialProfile>> {
        let mut conn = self.db.conn().await?;
        financial_profiles::table
            .filter(financial_profiles::user_id.eq(user_id))
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)
    }

    pub async fn save_profile(&self, profile: &FinancialProfile) -> Result<()> {
        let mut conn = self.db.conn().await?;
        diesel::insert_into(financial_profiles::table)
            .values(profile)
            .on_conflict(financial_profiles::user_id)
            .do_update()
            .set(profile)
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn active_plans(&self, user_id: i32) -> Result<Vec<FinancialPlan>> {
        let mut conn = self.db.conn().await?;
        financial_plans::table
            .filter(financial_plans::user_id.eq(user_id))
            .filter(financial_plans::status.eq("active"))
            .order(financial_plans::created_at.desc())
            .load(&mut conn)
            .await
            .map_err(db_err)
    }

    pub async fn create_plan(
        &self,
        user_id: i32,
        title: &str,
        plan_type: &str,
        summary: Option<&str>,
    ) -> Result<FinancialPlan> {
        let new = NewPlan {
            user_id,
            title,
            plan_type,
            status: "active",
            summary,
            created_at: now_ms(),
        };
        let mut conn = self.db.conn().await?;
        diesel::insert_into(financial_plans::table)
            .values(&new)
            .returning(financial_plans::all_columns)
            .get_result(&mut conn)
            .await
            .map_err(db_err)
    }

    pub async fn active_alerts(&self, user_id: i32) -> Result<Vec<PriceAlert>> {
        let mut conn = self.db.conn().await?;
        price_alerts::table
            .filter(price_alerts::user_id.eq(user_id))
            .filter(price_alerts::is_active.eq(true))
            .order(price_alerts::created_at.desc())
            .load(&mut conn)
            .await
            .map_err(db_err)
    }

    pub async fn create_alert(
        &self,
        user_id: i32,
        symbol: &str,
        condition: &str,
        target_price: f64,
    ) -> Result<PriceAlert> {
        let symbol = symbol.trim().to_uppercase();
        let new = NewAlert {
            user_id,
            symbol: &symbol,
            condition,
            target_price,
            is_active: true,
            triggered: false,
            created_at: now_ms(),
        };
        let mut conn = self.db.conn().await?;
        diesel::insert_into(price_alerts::table)
            .values(&new)
            .returning(price_alerts::all_columns)
            .get_result(&mut conn)
            .await
            .map_err(db_err)
    }

    pub async fn mark_alert_triggered(&self, user_id: i32, alert_id: i32) -> Result<PriceAlert> {
        let mut conn = self.db.conn().await?;
        let updated = diesel::update(
            price_alerts::table
                .filter(price_alerts::id.eq(alert_id))
                .filter(price_alerts::user_id.eq(user_id)),
        )
        .set(price_alerts::triggered.eq(true))
        .execute(&mut conn)
        .await
        .map_err(db_err)?;
        if updated == 0 {
            return Err(WealthWiseError::NotFound("alert".to_string()));
        }
        price_alerts::table
            .filter(price_alerts::id.eq(alert_id))
            .first(&mut conn)
            .await
            .map_err(db_err)
    }

    pub async fn subscription_status(&self, user_id: i32) -> Result<Option<String>> {
        let mut conn = self.db.conn().await?;
        subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .select(subscriptions::status)
            .first(&mut conn)
            .await
            .optional()
            .map_err(db_err)
    }

    pub async fn set_subscription_status(&self, user_id: i32, status: &str) -> Result<()> {
        let now = now_ms();
        let mut conn = self.db.conn().await?;
        diesel::insert_into(subscriptions::table)
            .values((
                subscriptions::user_id.eq(user_id),
                subscriptions::status.eq(status),
                subscriptions::updated_at.eq(now),
            ))
            .on_conflict(subscriptions::user_id)
            .do_update()
            .set((
                subscriptions::status.eq(status),
                subscriptions::updated_at.eq(now),
            ))
            .execute(&mut conn)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
