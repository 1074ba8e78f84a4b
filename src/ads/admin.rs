//! Administrator operations: feature configuration and ad analytics.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use super::repository::RepoResult;
use super::types::{AdImpressionLog, AdType, FeatureAdConfig, ImpressionStatus, Platform};
use super::AdManager;

/// Keeps an explicit `null` apart from an absent field.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Partial update of a feature's ad configuration. Absent fields keep their
/// value; a `null` placement id clears it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigPatch {
    pub feature_display_name: Option<String>,
    pub is_active: Option<bool>,
    pub show_ad_after_use: Option<bool>,
    pub ad_type: Option<AdType>,
    pub show_frequency: Option<u32>,
    pub max_ads_per_day: Option<u32>,
    pub skip_if_ad_seen_today: Option<bool>,
    pub skip_for_premium: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub ios_placement_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub android_placement_id: Option<Option<String>>,
}

/// Counts are stored as `INTEGER`.
const MAX_COUNT: u32 = i32::MAX as u32;

impl ConfigPatch {
    pub fn validate(&self) -> Result<(), String> {
        if self.show_frequency == Some(0) {
            return Err("show_frequency must be at least 1".to_string());
        }
        for (field, value) in [
            ("show_frequency", self.show_frequency),
            ("max_ads_per_day", self.max_ads_per_day),
        ] {
            if value.is_some_and(|v| v > MAX_COUNT) {
                return Err(format!("{} must be at most {}", field, MAX_COUNT));
            }
        }
        Ok(())
    }

    pub fn apply(self, config: &mut FeatureAdConfig, now: DateTime<Utc>) {
        if let Some(v) = self.feature_display_name {
            config.feature_display_name = v;
        }
        if let Some(v) = self.is_active {
            config.is_active = v;
        }
        if let Some(v) = self.show_ad_after_use {
            config.show_ad_after_use = v;
        }
        if let Some(v) = self.ad_type {
            config.ad_type = v;
        }
        if let Some(v) = self.show_frequency {
            config.show_frequency = v;
        }
        if let Some(v) = self.max_ads_per_day {
            config.max_ads_per_day = v;
        }
        if let Some(v) = self.skip_if_ad_seen_today {
            config.skip_if_ad_seen_today = v;
        }
        if let Some(v) = self.skip_for_premium {
            config.skip_for_premium = v;
        }
        if let Some(v) = self.ios_placement_id {
            config.ios_placement_id = v;
        }
        if let Some(v) = self.android_placement_id {
            config.android_placement_id = v;
        }
        config.updated_at = now;
    }
}

/// Aggregated ad events for one day, feature and platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalyticsRow {
    pub date: NaiveDate,
    pub feature: String,
    pub platform: Platform,
    pub impressions: u64,
    pub clicks: u64,
    pub closes: u64,
    pub failures: u64,
    /// Click-through rate in percent
    pub ctr: f64,
}

/// Longest analytics window, in days.
pub const MAX_ANALYTICS_DAYS: u32 = 365;

/// Built-in feature rules seeded by `initialize_feature_configs`.
const DEFAULT_FEATURES: &[(&str, &str, u32, u32)] = &[
    ("daily_quiz", "Daily Quiz", 1, 10),
    ("mock_test", "Mock Test", 2, 5),
    ("pair_quiz", "Pair Quiz", 1, 8),
    ("ask_question", "Ask Question", 3, 3),
];

pub fn default_feature_configs(now: DateTime<Utc>) -> Vec<FeatureAdConfig> {
    DEFAULT_FEATURES
        .iter()
        .map(|&(name, display_name, show_frequency, max_ads_per_day)| {
            let mut config = FeatureAdConfig::new(name, now);
            config.feature_display_name = display_name.to_string();
            config.show_frequency = show_frequency;
            config.max_ads_per_day = max_ads_per_day;
            config.ios_placement_id = Some(format!("ios-{}", name));
            config.android_placement_id = Some(format!("android-{}", name));
            config
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl AdManager {
    /// Create or update the configuration for `feature_name`. Returns the
    /// stored configuration and whether it was newly created.
    pub async fn configure_feature(
        &self,
        feature_name: &str,
        patch: ConfigPatch,
    ) -> RepoResult<(FeatureAdConfig, bool)> {
        let now = Utc::now();
        let (mut config, created) = match self.repo.find_config(feature_name).await? {
            Some(existing) => (existing, false),
            None => (FeatureAdConfig::new(feature_name, now), true),
        };
        patch.apply(&mut config, now);

        let saved = self.repo.save_config(config).await?;
        info!(
            "Feature ad config {}: {}",
            if created { "created" } else { "updated" },
            saved.feature_name
        );
        Ok((saved, created))
    }

    pub async fn list_feature_configs(&self) -> RepoResult<Vec<FeatureAdConfig>> {
        self.repo.list_configs().await
    }

    /// Seed the default feature configurations, leaving existing ones
    /// untouched. Returns how many were created.
    pub async fn initialize_feature_configs(&self) -> RepoResult<usize> {
        let mut created = 0;
        for config in default_feature_configs(Utc::now()) {
            if self.repo.insert_config_if_absent(config).await? {
                created += 1;
            }
        }
        info!("Initialized {} feature configs", created);
        Ok(created)
    }

    /// Per-day analytics for the last `days` days, newest first.
    pub async fn analytics(
        &self,
        days: u32,
        feature: Option<String>,
    ) -> RepoResult<Vec<AnalyticsRow>> {
        let now = Utc::now();
        let today = self.ad_day(now);
        let start = today.start - Duration::days(i64::from(days.min(MAX_ANALYTICS_DAYS)));
        let logs = self.repo.impressions_between(None, feature, start, today.end).await?;
        Ok(self.summarize(&logs))
    }

    pub fn summarize(&self, logs: &[AdImpressionLog]) -> Vec<AnalyticsRow> {
        let mut groups: BTreeMap<(NaiveDate, String, Platform), [u64; 4]> = BTreeMap::new();
        for log in logs {
            let date = self.ad_day(log.created_at).date;
            let counts = groups
                .entry((date, log.feature.clone(), log.platform))
                .or_insert([0; 4]);
            match log.status {
                ImpressionStatus::Shown => counts[0] += 1,
                ImpressionStatus::Clicked => counts[1] += 1,
                ImpressionStatus::Closed => counts[2] += 1,
                ImpressionStatus::Failed => counts[3] += 1,
                ImpressionStatus::Skipped | ImpressionStatus::Completed => {}
            }
        }

        let mut rows: Vec<AnalyticsRow> = groups
            .into_iter()
            .map(|((date, feature, platform), [impressions, clicks, closes, failures])| {
                let ctr = if impressions > 0 {
                    round2(clicks as f64 / impressions as f64 * 100.0)
                } else {
                    0.0
                };
                AnalyticsRow { date, feature, platform, impressions, clicks, closes, failures, ctr }
            })
            .collect();
        // BTreeMap order is ascending; newest day first, ties keep feature/platform order
        rows.sort_by(|a, b| b.date.cmp(&a.date));
        rows
    }
}
