//! Ads module for the quiz app backend
//!
//! Decides whether a feature use should be followed by an ad, records
//! what the client did with it, and keeps the per-user counters that
//! drive daily caps and show frequency.

pub mod admin;
pub mod handlers;
mod logger;
mod policy;
pub mod repository;
mod stats;
pub mod tracker;
pub mod types;

use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;

pub use admin::{AnalyticsRow, ConfigPatch};
pub use logger::ImpressionReport;
pub use policy::{Decision, DenyReason};
pub use repository::{AdRepository, RepoResult};
pub use stats::{ImpressionBreakdown, UserAdStats};
pub use tracker::{AdDay, AdLimitTracker};
pub use types::{
    AdImpressionLog, AdType, ClientMeta, FeatureAdConfig, ImpressionStatus, NewImpression,
    PlacementIds, Platform,
};

/// Subscription plan whose holders never see ads.
pub const PREMIUM_PLAN: &str = "premium";

pub struct AdManager {
    repo: Arc<dyn AdRepository>,
    day_offset: FixedOffset,
}

impl AdManager {
    pub fn new(repo: Arc<dyn AdRepository>, day_offset: FixedOffset) -> Self {
        Self { repo, day_offset }
    }

    /// The ad day `now` falls in.
    pub fn ad_day(&self, now: DateTime<Utc>) -> AdDay {
        AdDay::containing(now, self.day_offset)
    }

    pub fn repository(&self) -> &Arc<dyn AdRepository> {
        &self.repo
    }

    pub(crate) async fn is_premium(&self, user_id: uuid::Uuid) -> RepoResult<bool> {
        Ok(self
            .repo
            .active_plan_name(user_id)
            .await?
            .is_some_and(|plan| plan == PREMIUM_PLAN))
    }
}
