use chrono::{DateTime, Utc};
use tracing::{error, info};
use uuid::Uuid;

use super::repository::RepoResult;
use super::types::{AdImpressionLog, AdType, ClientMeta, ImpressionStatus, NewImpression, Platform};
use super::AdManager;

/// What a client reports about an ad it was offered.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpressionReport {
    pub feature: String,
    pub ad_type: AdType,
    pub platform: Platform,
    pub status: ImpressionStatus,
    pub client: ClientMeta,
}

impl AdManager {
    /// Record an ad event and update the user's counters.
    ///
    /// Returns `None` when the event could not be stored; the failure is
    /// logged and never reaches the caller.
    pub async fn log_ad_impression(
        &self,
        user_id: Uuid,
        report: ImpressionReport,
    ) -> Option<AdImpressionLog> {
        self.log_ad_impression_at(user_id, report, Utc::now()).await
    }

    pub async fn log_ad_impression_at(
        &self,
        user_id: Uuid,
        report: ImpressionReport,
        now: DateTime<Utc>,
    ) -> Option<AdImpressionLog> {
        let feature = report.feature.clone();
        let status = report.status;

        match self.record_impression(user_id, report, now).await {
            Ok(entry) => {
                info!("Ad logged: {} - {} ({})", user_id, feature, status);
                Some(entry)
            }
            Err(e) => {
                error!("Error logging ad impression for user {}: {}", user_id, e);
                None
            }
        }
    }

    async fn record_impression(
        &self,
        user_id: Uuid,
        report: ImpressionReport,
        now: DateTime<Utc>,
    ) -> RepoResult<AdImpressionLog> {
        let placement_id = self
            .repo
            .get_config(&report.feature)
            .await?
            .and_then(|config| config.placement_for(report.platform));

        let entry = NewImpression {
            user_id,
            feature: report.feature,
            ad_type: report.ad_type,
            platform: report.platform,
            status: report.status,
            placement_id,
            client: report.client,
            created_at: now,
        };

        self.repo.append_log(entry, self.ad_day(now).date).await
    }
}
