//! In-memory ad repository
//!
//! Everything lives behind one async mutex, so tracker resets and
//! impression appends are atomic per call.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::ads::repository::{AdRepository, RepoResult};
use crate::ads::{AdImpressionLog, AdLimitTracker, FeatureAdConfig, NewImpression};

#[derive(Debug, Default)]
struct MemoryState {
    plans: HashMap<Uuid, String>,
    configs: BTreeMap<String, FeatureAdConfig>,
    trackers: HashMap<Uuid, AdLimitTracker>,
    logs: Vec<AdImpressionLog>,
}

impl MemoryState {
    fn tracker_for(&mut self, user_id: Uuid, today: NaiveDate) -> &mut AdLimitTracker {
        let tracker = self
            .trackers
            .entry(user_id)
            .or_insert_with(|| AdLimitTracker::new(user_id, today));
        tracker.reset_daily_if_needed(today);
        tracker
    }
}

#[derive(Debug, Default, Clone)]
pub struct MemoryAdRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAdRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Give the user an active subscription on `plan_name`.
    pub async fn set_active_plan(&self, user_id: Uuid, plan_name: &str) {
        self.state.lock().await.plans.insert(user_id, plan_name.to_string());
    }

    pub async fn cancel_subscription(&self, user_id: Uuid) {
        self.state.lock().await.plans.remove(&user_id);
    }

    /// Replace a user's stored tracker as-is, without any day check.
    pub async fn put_tracker(&self, tracker: AdLimitTracker) {
        self.state.lock().await.trackers.insert(tracker.user_id, tracker);
    }

    /// The stored tracker, exactly as last persisted.
    pub async fn stored_tracker(&self, user_id: Uuid) -> Option<AdLimitTracker> {
        self.state.lock().await.trackers.get(&user_id).cloned()
    }

    pub async fn log_count(&self) -> usize {
        self.state.lock().await.logs.len()
    }
}

#[async_trait]
impl AdRepository for MemoryAdRepository {
    async fn active_plan_name(&self, user_id: Uuid) -> RepoResult<Option<String>> {
        Ok(self.state.lock().await.plans.get(&user_id).cloned())
    }

    async fn get_config(&self, feature_name: &str) -> RepoResult<Option<FeatureAdConfig>> {
        Ok(self
            .state
            .lock()
            .await
            .configs
            .get(feature_name)
            .filter(|config| config.is_active)
            .cloned())
    }

    async fn find_config(&self, feature_name: &str) -> RepoResult<Option<FeatureAdConfig>> {
        Ok(self.state.lock().await.configs.get(feature_name).cloned())
    }

    async fn list_configs(&self) -> RepoResult<Vec<FeatureAdConfig>> {
        Ok(self.state.lock().await.configs.values().cloned().collect())
    }

    async fn save_config(&self, config: FeatureAdConfig) -> RepoResult<FeatureAdConfig> {
        let mut state = self.state.lock().await;
        let stored = match state.configs.get(&config.feature_name) {
            Some(existing) => FeatureAdConfig { created_at: existing.created_at, ..config },
            None => config,
        };
        state.configs.insert(stored.feature_name.clone(), stored.clone());
        Ok(stored)
    }

    async fn insert_config_if_absent(&self, config: FeatureAdConfig) -> RepoResult<bool> {
        let mut state = self.state.lock().await;
        if state.configs.contains_key(&config.feature_name) {
            return Ok(false);
        }
        state.configs.insert(config.feature_name.clone(), config);
        Ok(true)
    }

    async fn load_tracker(&self, user_id: Uuid, today: NaiveDate) -> RepoResult<AdLimitTracker> {
        let mut state = self.state.lock().await;
        Ok(state.tracker_for(user_id, today).clone())
    }

    async fn append_log(&self, entry: NewImpression, today: NaiveDate) -> RepoResult<AdImpressionLog> {
        let mut state = self.state.lock().await;

        state
            .tracker_for(entry.user_id, today)
            .record_impression(&entry.feature, entry.status, entry.created_at);

        let log = AdImpressionLog::from_new(Uuid::new_v4(), entry);
        state.logs.push(log.clone());
        Ok(log)
    }

    async fn has_impression_between(
        &self,
        user_id: Uuid,
        feature: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepoResult<bool> {
        Ok(self.state.lock().await.logs.iter().any(|log| {
            log.user_id == user_id
                && log.feature == feature
                && log.created_at >= start
                && log.created_at < end
        }))
    }

    async fn impressions_between(
        &self,
        user_id: Option<Uuid>,
        feature: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepoResult<Vec<AdImpressionLog>> {
        Ok(self
            .state
            .lock()
            .await
            .logs
            .iter()
            .filter(|log| log.created_at >= start && log.created_at < end)
            .filter(|log| user_id.map_or(true, |id| log.user_id == id))
            .filter(|log| feature.as_deref().map_or(true, |f| log.feature == f))
            .cloned()
            .collect())
    }
}
