use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::types::ImpressionStatus;

/// The calendar day ads are counted against, with its bounds in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdDay {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AdDay {
    pub fn containing(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let date = now.with_timezone(&offset).date_naive();
        let local_midnight = date.and_time(NaiveTime::MIN);
        let start = Utc.from_utc_datetime(
            &(local_midnight - Duration::seconds(offset.local_minus_utc() as i64)),
        );
        Self {
            date,
            start,
            end: start + Duration::days(1),
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// Per-user counters governing ad frequency and daily caps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdLimitTracker {
    pub user_id: Uuid,
    pub ads_shown_today: u32,
    pub feature_use_counts: HashMap<String, u32>,
    pub last_ad_shown: Option<DateTime<Utc>>,
    pub last_reset_date: NaiveDate,
}

impl AdLimitTracker {
    pub fn new(user_id: Uuid, today: NaiveDate) -> Self {
        Self {
            user_id,
            ads_shown_today: 0,
            feature_use_counts: HashMap::new(),
            last_ad_shown: None,
            last_reset_date: today,
        }
    }

    /// Clears the daily counters when `today` is not the day they were
    /// collected on. Returns whether anything changed.
    pub fn reset_daily_if_needed(&mut self, today: NaiveDate) -> bool {
        if self.last_reset_date == today {
            return false;
        }
        self.ads_shown_today = 0;
        self.feature_use_counts.clear();
        self.last_reset_date = today;
        true
    }

    pub fn feature_uses(&self, feature: &str) -> u32 {
        self.feature_use_counts.get(feature).copied().unwrap_or(0)
    }

    /// Counts one display attempt for `feature`; only `shown` counts toward the daily cap.
    pub fn record_impression(
        &mut self,
        feature: &str,
        status: ImpressionStatus,
        now: DateTime<Utc>,
    ) {
        let uses = self.feature_use_counts.entry(feature.to_string()).or_insert(0);
        *uses = uses.saturating_add(1);

        if status == ImpressionStatus::Shown {
            self.ads_shown_today = self.ads_shown_today.saturating_add(1);
            self.last_ad_shown = Some(now);
        }
    }
}
