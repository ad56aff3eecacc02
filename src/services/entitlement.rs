//! Per-feature usage quotas.
//!
//! `insights` is metered per UTC day; every other feature per calendar month. `check`
//! and `increment` derive the window from the instant they are given and never cache it.

use std::collections::BTreeMap;

use serde::Serialize;
use time::{Date, Duration, Month, OffsetDateTime, UtcOffset};
use tracing::{debug, info};

use crate::db::Database;
use crate::error::{Result, WealthWiseError};
use crate::profile::{ProfileStore, ACTIVE_SUBSCRIPTION};
use crate::usage::UsageStore;

pub const UNLIMITED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    Messages,
    Plans,
    Alerts,
    Insights,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::Messages,
        Feature::Plans,
        Feature::Alerts,
        Feature::Insights,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Messages => "messages",
            Feature::Plans => "plans",
            Feature::Alerts => "alerts",
            Feature::Insights => "insights",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "messages" => Ok(Feature::Messages),
            "plans" => Ok(Feature::Plans),
            "alerts" => Ok(Feature::Alerts),
            "insights" => Ok(Feature::Insights),
            other => Err(WealthWiseError::Config(format!("unknown feature '{other}'"))),
        }
    }

    pub fn is_daily(&self) -> bool {
        matches!(self, Feature::Insights)
    }

    pub fn limit(&self, is_pro: bool) -> i64 {
        match (self, is_pro) {
            (Feature::Messages, false) => 5,
            (Feature::Plans, false) => 1,
            (Feature::Alerts, false) => 3,
            (Feature::Insights, false) => 1,
            (Feature::Insights, true) => 5,
            (_, true) => UNLIMITED,
        }
    }
}

/// Half-open `[start, end)` interval in unix milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageWindow {
    pub start: i64,
    pub end: i64,
}

impl UsageWindow {
    pub fn contains(&self, instant_ms: i64) -> bool {
        self.start <= instant_ms && instant_ms < self.end
    }
}

pub fn usage_window(feature: Feature, now: OffsetDateTime) -> Result<UsageWindow> {
    let today = now.to_offset(UtcOffset::UTC).date();
    let (start, end) = if feature.is_daily() {
        let start = today.midnight().assume_utc();
        (start, start + Duration::DAY)
    } else {
        let first = first_of_month(today.year(), today.month())?;
        let (next_year, next_month) = if today.month() == Month::December {
            (today.year() + 1, Month::January)
        } else {
            (today.year(), today.month().next())
        };
        (first, first_of_month(next_year, next_month)?)
    };
    Ok(UsageWindow {
        start: unix_ms(start),
        end: unix_ms(end),
    })
}

fn first_of_month(year: i32, month: Month) -> Result<OffsetDateTime> {
    Date::from_calendar_date(year, month, 1)
        .map(|date| date.midnight().assume_utc())
        .map_err(|e| WealthWiseError::Runtime(e.to_string()))
}

fn unix_ms(instant: OffsetDateTime) -> i64 {
    (instant.unix_timestamp_nanos() / 1_000_000) as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Entitlement {
    pub allowed: bool,
    pub usage: i64,
    pub limit: i64,
    pub is_pro: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureUsage {
    pub usage: i64,
    pub limit: i64,
    /// `-1` when unlimited.
    pub remaining: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    #[serde(flatten)]
    pub features: BTreeMap<&'static str, FeatureUsage>,
    pub is_pro: bool,
}

pub struct EntitlementGate {
    usage: UsageStore,
    profiles: ProfileStore,
}

impl EntitlementGate {
    pub fn new(db: Database) -> Self {
        Self {
            usage: UsageStore::new(db.clone()),
            profiles: ProfileStore::new(db),
        }
    }

    /// Tier is read fresh on every call.
    pub async fn is_pro(&self, user_id: i32) -> Result<bool> {
        Ok(self
            .profiles
            .subscription_status(user_id)
            .await?
            .is_some_and(|status| status == ACTIVE_SUBSCRIPTION))
    }

    pub async fn check(&self, user_id: i32, feature: Feature) -> Result<Entitlement> {
        self.check_at(user_id, feature, OffsetDateTime::now_utc())
            .await
    }

    pub async fn check_at(
        &self,
        user_id: i32,
        feature: Feature,
        now: OffsetDateTime,
    ) -> Result<Entitlement> {
        let is_pro = self.is_pro(user_id).await?;
        let limit = feature.limit(is_pro);
        let window = usage_window(feature, now)?;
        let usage = self
            .usage
            .count(user_id, feature.as_str(), window.start)
            .await?;
        let allowed = limit == UNLIMITED || usage < limit;
        debug!(user_id, feature = feature.as_str(), usage, limit, allowed, "Entitlement check");
        Ok(Entitlement {
            allowed,
            usage,
            limit,
            is_pro,
        })
    }

    /// Like `check`, but a denial becomes `EntitlementDenied`.
    pub async fn require(&self, user_id: i32, feature: Feature) -> Result<Entitlement> {
        let entitlement = self.check(user_id, feature).await?;
        if !entitlement.allowed {
            info!(
                user_id,
                feature = feature.as_str(),
                usage = entitlement.usage,
                limit = entitlement.limit,
                "Entitlement denied"
            );
            return Err(WealthWiseError::EntitlementDenied {
                feature: feature.as_str().to_string(),
                usage: entitlement.usage,
                limit: entitlement.limit,
                is_pro: entitlement.is_pro,
            });
        }
        Ok(entitlement)
    }

    pub async fn increment(&self, user_id: i32, feature: Feature) -> Result<i64> {
        self.increment_at(user_id, feature, OffsetDateTime::now_utc())
            .await
    }

    pub async fn increment_at(
        &self,
        user_id: i32,
        feature: Feature,
        now: OffsetDateTime,
    ) -> Result<i64> {
        let window = usage_window(feature, now)?;
        self.usage
            .increment(user_id, feature.as_str(), window.start, window.end)
            .await
    }

    pub async fn usage_summary(&self, user_id: i32) -> Result<UsageSummary> {
        let is_pro = self.is_pro(user_id).await?;
        let now = OffsetDateTime::now_utc();
        let mut features = BTreeMap::new();
        for feature in Feature::ALL {
            let window = usage_window(feature, now)?;
            let usage = self
                .usage
                .count(user_id, feature.as_str(), window.start)
                .await?;
            let limit = feature.limit(is_pro);
            let remaining = if limit == UNLIMITED {
                UNLIMITED
            } else {
                (limit - usage).max(0)
            };
            features.insert(
                feature.as_str(),
                FeatureUsage {
                    usage,
                    limit,
                    remaining,
                },
            );
        }
        Ok(UsageSummary { features, is_pro })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn monthly_window_rolls_december_into_january() {
        let window = usage_window(Feature::Messages, datetime!(2025-12-31 23:59:59 UTC)).unwrap();
        assert_eq!(window.start, unix_ms(datetime!(2025-12-01 0:00 UTC)));
        assert_eq!(window.end, unix_ms(datetime!(2026-01-01 0:00 UTC)));
    }

    #[test]
    fn monthly_window_is_half_open() {
        let boundary = datetime!(2026-03-01 0:00 UTC);
        let window = usage_window(Feature::Alerts, boundary).unwrap();
        assert_eq!(window.start, unix_ms(boundary));
        assert!(window.contains(unix_ms(boundary)));
        assert!(!window.contains(unix_ms(datetime!(2026-04-01 0:00 UTC))));

        let before = usage_window(Feature::Alerts, datetime!(2026-02-28 23:59:59.999 UTC)).unwrap();
        assert_eq!(before.end, window.start);
    }

    #[test]
    fn insights_use_a_daily_utc_window() {
        let window = usage_window(Feature::Insights, datetime!(2026-07-04 18:30 UTC)).unwrap();
        assert_eq!(window.start, unix_ms(datetime!(2026-07-04 0:00 UTC)));
        assert_eq!(window.end - window.start, 86_400_000);
    }

    #[test]
    fn offsets_are_normalized_to_utc() {
        let local = datetime!(2026-01-01 01:00 +02:00);
        let window = usage_window(Feature::Insights, local).unwrap();
        assert_eq!(window.start, unix_ms(datetime!(2025-12-31 0:00 UTC)));
    }

    #[test]
    fn tier_limits() {
        assert_eq!(Feature::Messages.limit(false), 5);
        assert_eq!(Feature::Plans.limit(false), 1);
        assert_eq!(Feature::Alerts.limit(false), 3);
        assert_eq!(Feature::Insights.limit(false), 1);
        assert_eq!(Feature::Messages.limit(true), UNLIMITED);
        assert_eq!(Feature::Insights.limit(true), 5);
    }
}
