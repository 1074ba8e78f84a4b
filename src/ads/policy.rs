use chrono::{DateTime, Utc};
use std::fmt;
use tracing::{debug, error};
use uuid::Uuid;

use super::repository::RepoResult;
use super::types::{AdType, PlacementIds, Platform};
use super::AdManager;

/// Why an ad is withheld.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    Premium,
    NotConfigured,
    Disabled,
    DailyLimitReached { limit: u32 },
    FrequencyNotMet { every: u32 },
    AlreadyShownToday,
    /// The decision could not be evaluated.
    Error(String),
}

impl DenyReason {
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::Premium => "premium",
            DenyReason::NotConfigured => "not_configured",
            DenyReason::Disabled => "disabled",
            DenyReason::DailyLimitReached { .. } => "daily_limit_reached",
            DenyReason::FrequencyNotMet { .. } => "frequency_not_met",
            DenyReason::AlreadyShownToday => "already_shown_today",
            DenyReason::Error(_) => "error",
        }
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Premium => f.write_str("Premium user - no ads"),
            DenyReason::NotConfigured => f.write_str("Feature not configured for ads"),
            DenyReason::Disabled => f.write_str("Feature ads disabled"),
            DenyReason::DailyLimitReached { limit } => write!(f, "Daily limit reached ({})", limit),
            DenyReason::FrequencyNotMet { every } => {
                write!(f, "Frequency not met (every {} uses)", every)
            }
            DenyReason::AlreadyShownToday => f.write_str("Ad already shown today for this feature"),
            DenyReason::Error(message) => write!(f, "Error: {}", message),
        }
    }
}

/// Outcome of an eligibility check. Only `Show` lets a client display an ad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Show {
        placement_ids: PlacementIds,
        ad_type: AdType,
    },
    Deny(DenyReason),
}

impl Decision {
    pub fn should_show(&self) -> bool {
        matches!(self, Decision::Show { .. })
    }

    pub fn reason(&self) -> String {
        match self {
            Decision::Show { .. } => "Show ad".to_string(),
            Decision::Deny(reason) => reason.to_string(),
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            Decision::Show { .. } => "show",
            Decision::Deny(reason) => reason.code(),
        }
    }

    pub fn placement_ids(&self) -> Option<&PlacementIds> {
        match self {
            Decision::Show { placement_ids, .. } => Some(placement_ids),
            Decision::Deny(_) => None,
        }
    }

    pub fn ad_type(&self) -> Option<AdType> {
        match self {
            Decision::Show { ad_type, .. } => Some(*ad_type),
            Decision::Deny(_) => None,
        }
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            Decision::Show { .. } => None,
            Decision::Deny(reason) => Some(reason),
        }
    }
}

impl AdManager {
    /// Decide whether `user_id` should see an ad after using `feature_name`.
    ///
    /// Rules are checked in a fixed order and the first match wins: premium
    /// plan, missing configuration, disabled configuration, daily cap, show
    /// frequency, already seen today. A storage failure denies the ad.
    pub async fn check_should_show_ad(
        &self,
        user_id: Uuid,
        feature_name: &str,
        platform: Platform,
    ) -> Decision {
        self.check_should_show_ad_at(user_id, feature_name, platform, Utc::now()).await
    }

    pub async fn check_should_show_ad_at(
        &self,
        user_id: Uuid,
        feature_name: &str,
        platform: Platform,
        now: DateTime<Utc>,
    ) -> Decision {
        let decision = match self.evaluate(user_id, feature_name, now).await {
            Ok(decision) => decision,
            Err(e) => {
                error!("Error checking ad display for user {}: {}", user_id, e);
                Decision::Deny(DenyReason::Error(e.to_string()))
            }
        };

        debug!(
            user_id = %user_id,
            feature = feature_name,
            platform = %platform,
            reason = decision.reason_code(),
            "Ad eligibility evaluated"
        );
        decision
    }

    async fn evaluate(
        &self,
        user_id: Uuid,
        feature_name: &str,
        now: DateTime<Utc>,
    ) -> RepoResult<Decision> {
        if self.is_premium(user_id).await? {
            return Ok(Decision::Deny(DenyReason::Premium));
        }

        let config = match self.repo.get_config(feature_name).await? {
            Some(config) => config,
            None => return Ok(Decision::Deny(DenyReason::NotConfigured)),
        };

        if !config.show_ad_after_use {
            return Ok(Decision::Deny(DenyReason::Disabled));
        }

        let today = self.ad_day(now);
        let tracker = self.repo.load_tracker(user_id, today.date).await?;

        if tracker.ads_shown_today >= config.max_ads_per_day {
            return Ok(Decision::Deny(DenyReason::DailyLimitReached {
                limit: config.max_ads_per_day,
            }));
        }

        // the use about to happen
        let upcoming_use = tracker.feature_uses(feature_name).saturating_add(1);
        if config.show_frequency > 1 && upcoming_use % config.show_frequency != 0 {
            return Ok(Decision::Deny(DenyReason::FrequencyNotMet {
                every: config.show_frequency,
            }));
        }

        if config.skip_if_ad_seen_today
            && self
                .repo
                .has_impression_between(user_id, feature_name, today.start, today.end)
                .await?
        {
            return Ok(Decision::Deny(DenyReason::AlreadyShownToday));
        }

        Ok(Decision::Show {
            placement_ids: config.placement_ids(),
            ad_type: config.ad_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::repository::MockAdRepository;
    use crate::ads::tracker::AdLimitTracker;
    use crate::ads::types::FeatureAdConfig;
    use crate::error::DatabaseError;
    use chrono::FixedOffset;
    use std::sync::Arc;

    fn manager(repo: MockAdRepository) -> AdManager {
        AdManager::new(Arc::new(repo), FixedOffset::east_opt(0).unwrap())
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(
            DenyReason::DailyLimitReached { limit: 2 }.to_string(),
            "Daily limit reached (2)"
        );
        assert_eq!(
            DenyReason::FrequencyNotMet { every: 3 }.to_string(),
            "Frequency not met (every 3 uses)"
        );
        assert_eq!(DenyReason::Error("timeout".into()).to_string(), "Error: timeout");
        assert_eq!(DenyReason::Premium.code(), "premium");
    }

    #[test]
    fn test_only_show_carries_placements() {
        let deny = Decision::Deny(DenyReason::Disabled);
        assert!(!deny.should_show());
        assert!(deny.placement_ids().is_none());
        assert!(deny.ad_type().is_none());
        assert_eq!(deny.reason(), "Feature ads disabled");

        let show = Decision::Show {
            placement_ids: PlacementIds { ios: Some("a".into()), android: None },
            ad_type: AdType::Banner,
        };
        assert!(show.should_show());
        assert_eq!(show.reason(), "Show ad");
        assert_eq!(show.reason_code(), "show");
        assert_eq!(show.ad_type(), Some(AdType::Banner));
    }

    #[test_log::test(tokio::test)]
    async fn test_subscription_lookup_failure_denies() {
        let mut repo = MockAdRepository::new();
        repo.expect_active_plan_name()
            .returning(|_| Err(DatabaseError::ConnectionError("pool timed out".into())));
        repo.expect_get_config().never();

        let decision = manager(repo)
            .check_should_show_ad(Uuid::new_v4(), "daily_quiz", Platform::Ios)
            .await;

        assert!(!decision.should_show());
        assert_eq!(decision.reason_code(), "error");
        assert_eq!(decision.reason(), "Error: Connection error: pool timed out");
    }

    #[test_log::test(tokio::test)]
    async fn test_tracker_failure_denies() {
        let mut repo = MockAdRepository::new();
        repo.expect_active_plan_name().returning(|_| Ok(None));
        repo.expect_get_config()
            .returning(|name| Ok(Some(FeatureAdConfig::new(name, Utc::now()))));
        repo.expect_load_tracker()
            .returning(|_, _| Err(DatabaseError::QueryError("lock timeout".into())));

        let decision = manager(repo)
            .check_should_show_ad(Uuid::new_v4(), "daily_quiz", Platform::Android)
            .await;

        assert_eq!(
            decision.deny_reason(),
            Some(&DenyReason::Error("Query error: lock timeout".into()))
        );
    }

    #[tokio::test]
    async fn test_seen_today_lookup_failure_denies() {
        let mut repo = MockAdRepository::new();
        repo.expect_active_plan_name().returning(|_| Ok(Some("basic".to_string())));
        repo.expect_get_config().returning(|name| {
            let mut config = FeatureAdConfig::new(name, Utc::now());
            config.skip_if_ad_seen_today = true;
            Ok(Some(config))
        });
        repo.expect_load_tracker()
            .returning(|user_id, today| Ok(AdLimitTracker::new(user_id, today)));
        repo.expect_has_impression_between()
            .returning(|_, _, _, _| Err(DatabaseError::ConnectionError("reset".into())));

        let decision = manager(repo)
            .check_should_show_ad(Uuid::new_v4(), "daily_quiz", Platform::Ios)
            .await;

        assert!(!decision.should_show());
        assert_eq!(decision.reason_code(), "error");
    }

    #[tokio::test]
    async fn test_premium_skips_storage_reads() {
        let mut repo = MockAdRepository::new();
        repo.expect_active_plan_name()
            .times(1)
            .returning(|_| Ok(Some("premium".to_string())));
        repo.expect_get_config().never();
        repo.expect_load_tracker().never();

        let decision = manager(repo)
            .check_should_show_ad(Uuid::new_v4(), "daily_quiz", Platform::Ios)
            .await;

        assert_eq!(decision, Decision::Deny(DenyReason::Premium));
    }
}
