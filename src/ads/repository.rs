//! Storage interface for ad configuration, trackers and impression logs.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::tracker::AdLimitTracker;
use super::types::{AdImpressionLog, FeatureAdConfig, NewImpression};
use crate::error::DatabaseError;

pub type RepoResult<T> = Result<T, DatabaseError>;

/// Ad storage.
///
/// Implementations must make `load_tracker` and `append_log` atomic per
/// user: concurrent callers never observe a tracker from a previous day,
/// and a log entry is never stored without its tracker update (or the
/// reverse).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AdRepository: Send + Sync {
    /// Plan name of the user's active subscription, if any
    async fn active_plan_name(&self, user_id: Uuid) -> RepoResult<Option<String>>;

    /// Active configuration for a feature
    async fn get_config(&self, feature_name: &str) -> RepoResult<Option<FeatureAdConfig>>;

    /// Configuration for a feature, active or not
    async fn find_config(&self, feature_name: &str) -> RepoResult<Option<FeatureAdConfig>>;

    /// Every configuration, ordered by feature name
    async fn list_configs(&self) -> RepoResult<Vec<FeatureAdConfig>>;

    /// Insert or replace the configuration keyed by its feature name
    async fn save_config(&self, config: FeatureAdConfig) -> RepoResult<FeatureAdConfig>;

    /// Insert a configuration unless one exists; returns whether it was inserted
    async fn insert_config_if_absent(&self, config: FeatureAdConfig) -> RepoResult<bool>;

    /// Get or create the user's tracker, persisting a daily reset when `today`
    /// differs from the tracker's day.
    async fn load_tracker(&self, user_id: Uuid, today: NaiveDate) -> RepoResult<AdLimitTracker>;

    /// Store an impression and fold it into the user's tracker in one unit.
    async fn append_log(&self, entry: NewImpression, today: NaiveDate) -> RepoResult<AdImpressionLog>;

    /// Whether the user has any impression for the feature in `[start, end)`
    async fn has_impression_between(
        &self,
        user_id: Uuid,
        feature: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepoResult<bool>;

    /// Impressions in `[start, end)`, optionally narrowed to a user and a feature
    async fn impressions_between(
        &self,
        user_id: Option<Uuid>,
        feature: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepoResult<Vec<AdImpressionLog>>;
}
