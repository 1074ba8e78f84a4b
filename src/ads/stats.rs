use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::repository::RepoResult;
use super::types::{AdType, ImpressionStatus};
use super::AdManager;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImpressionBreakdown {
    pub ad_type: AdType,
    pub status: ImpressionStatus,
    pub count: u64,
}

/// A user's ad activity for the current day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserAdStats {
    pub is_premium: bool,
    pub ads_today: u32,
    pub feature_uses: HashMap<String, u32>,
    pub last_ad_shown: Option<DateTime<Utc>>,
    pub impressions_breakdown: Vec<ImpressionBreakdown>,
}

impl AdManager {
    pub async fn user_stats(&self, user_id: Uuid) -> RepoResult<UserAdStats> {
        self.user_stats_at(user_id, Utc::now()).await
    }

    pub async fn user_stats_at(&self, user_id: Uuid, now: DateTime<Utc>) -> RepoResult<UserAdStats> {
        let today = self.ad_day(now);
        let tracker = self.repo.load_tracker(user_id, today.date).await?;
        let logs = self
            .repo
            .impressions_between(Some(user_id), None, today.start, today.end)
            .await?;

        let mut counts: BTreeMap<(AdType, ImpressionStatus), u64> = BTreeMap::new();
        for log in &logs {
            *counts.entry((log.ad_type, log.status)).or_insert(0) += 1;
        }

        Ok(UserAdStats {
            is_premium: self.is_premium(user_id).await?,
            ads_today: tracker.ads_shown_today,
            feature_uses: tracker.feature_use_counts,
            last_ad_shown: tracker.last_ad_shown,
            impressions_breakdown: counts
                .into_iter()
                .map(|((ad_type, status), count)| ImpressionBreakdown { ad_type, status, count })
                .collect(),
        })
    }
}
