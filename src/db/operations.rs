use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ads::repository::{AdRepository, RepoResult};
use crate::ads::{AdImpressionLog, AdLimitTracker, FeatureAdConfig, NewImpression};
use crate::db::models::{AdImpressionLogRow, AdLimitTrackerRow, FeatureAdConfigRow};

const CONFIG_COLUMNS: &str = "feature_name, feature_display_name, is_active, show_ad_after_use, \
     ad_type, show_frequency, max_ads_per_day, skip_if_ad_seen_today, skip_for_premium, \
     ios_placement_id, android_placement_id, created_at, updated_at";

const LOG_COLUMNS: &str = "id, user_id, feature, ad_type, platform, status, placement_id, \
     ip_address, user_agent, created_at";

/// Roll back after a failed step; the step's error is what the caller sees.
async fn rollback(transaction: Transaction<'_, Postgres>) {
    if let Err(e) = transaction.rollback().await {
        warn!("Transaction rollback failed: {}", e);
    }
}

/// Postgres-backed ad repository.
#[derive(Clone)]
pub struct DbOperations {
    pool: Arc<PgPool>,
}

impl DbOperations {
    pub async fn new_with_options(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> RepoResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;

        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &Arc<PgPool> {
        &self.pool
    }

    pub async fn begin_transaction(&self) -> RepoResult<Transaction<'_, Postgres>> {
        Ok(self.pool.as_ref().begin().await?)
    }

    /// Get or create the user's tracker and hold its row lock for the rest of
    /// the transaction, resetting the daily counters when the day changed.
    async fn lock_tracker(
        transaction: &mut Transaction<'_, Postgres>,
        user_id: Uuid,
        today: NaiveDate,
    ) -> RepoResult<AdLimitTracker> {
        sqlx::query(
            r#"
            INSERT INTO ad_limit_trackers (user_id, ads_shown_today, feature_use_counts, last_reset_date)
            VALUES ($1, 0, '{}'::jsonb, $2)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(today)
        .execute(&mut **transaction)
        .await?;

        let row = sqlx::query_as::<_, AdLimitTrackerRow>(
            r#"
            SELECT user_id, ads_shown_today, feature_use_counts, last_ad_shown, last_reset_date
            FROM ad_limit_trackers
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut **transaction)
        .await?;

        let mut tracker = AdLimitTracker::try_from(row)?;
        if tracker.reset_daily_if_needed(today) {
            debug!("Daily ad counters reset for user {}", user_id);
            Self::store_tracker(transaction, &tracker).await?;
        }
        Ok(tracker)
    }

    async fn store_tracker(
        transaction: &mut Transaction<'_, Postgres>,
        tracker: &AdLimitTracker,
    ) -> RepoResult<()> {
        let row = AdLimitTrackerRow::try_from(tracker)?;
        sqlx::query(
            r#"
            UPDATE ad_limit_trackers
            SET ads_shown_today = $2, feature_use_counts = $3, last_ad_shown = $4,
                last_reset_date = $5, updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(row.user_id)
        .bind(row.ads_shown_today)
        .bind(row.feature_use_counts)
        .bind(row.last_ad_shown)
        .bind(row.last_reset_date)
        .execute(&mut **transaction)
        .await?;

        Ok(())
    }

    async fn fetch_config(
        &self,
        feature_name: &str,
        active_only: bool,
    ) -> RepoResult<Option<FeatureAdConfig>> {
        let sql = format!(
            "SELECT {} FROM feature_ad_configs WHERE feature_name = $1 AND (is_active OR NOT $2)",
            CONFIG_COLUMNS
        );
        sqlx::query_as::<_, FeatureAdConfigRow>(&sql)
            .bind(feature_name)
            .bind(active_only)
            .fetch_optional(self.pool.as_ref())
            .await?
            .map(FeatureAdConfig::try_from)
            .transpose()
    }
}

#[async_trait]
impl AdRepository for DbOperations {
    async fn active_plan_name(&self, user_id: Uuid) -> RepoResult<Option<String>> {
        let plan: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT plan_name
            FROM user_subscriptions
            WHERE user_id = $1 AND is_active
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(plan.map(|(name,)| name))
    }

    async fn get_config(&self, feature_name: &str) -> RepoResult<Option<FeatureAdConfig>> {
        self.fetch_config(feature_name, true).await
    }

    async fn find_config(&self, feature_name: &str) -> RepoResult<Option<FeatureAdConfig>> {
        self.fetch_config(feature_name, false).await
    }

    async fn list_configs(&self) -> RepoResult<Vec<FeatureAdConfig>> {
        let sql = format!("SELECT {} FROM feature_ad_configs ORDER BY feature_name", CONFIG_COLUMNS);
        sqlx::query_as::<_, FeatureAdConfigRow>(&sql)
            .fetch_all(self.pool.as_ref())
            .await?
            .into_iter()
            .map(FeatureAdConfig::try_from)
            .collect()
    }

    async fn save_config(&self, config: FeatureAdConfig) -> RepoResult<FeatureAdConfig> {
        let row = FeatureAdConfigRow::try_from(&config)?;
        let sql = format!(
            r#"
            INSERT INTO feature_ad_configs ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (feature_name) DO UPDATE SET
                feature_display_name = EXCLUDED.feature_display_name,
                is_active = EXCLUDED.is_active,
                show_ad_after_use = EXCLUDED.show_ad_after_use,
                ad_type = EXCLUDED.ad_type,
                show_frequency = EXCLUDED.show_frequency,
                max_ads_per_day = EXCLUDED.max_ads_per_day,
                skip_if_ad_seen_today = EXCLUDED.skip_if_ad_seen_today,
                skip_for_premium = EXCLUDED.skip_for_premium,
                ios_placement_id = EXCLUDED.ios_placement_id,
                android_placement_id = EXCLUDED.android_placement_id,
                updated_at = EXCLUDED.updated_at
            RETURNING {cols}
            "#,
            cols = CONFIG_COLUMNS
        );

        let saved = sqlx::query_as::<_, FeatureAdConfigRow>(&sql)
            .bind(row.feature_name)
            .bind(row.feature_display_name)
            .bind(row.is_active)
            .bind(row.show_ad_after_use)
            .bind(row.ad_type)
            .bind(row.show_frequency)
            .bind(row.max_ads_per_day)
            .bind(row.skip_if_ad_seen_today)
            .bind(row.skip_for_premium)
            .bind(row.ios_placement_id)
            .bind(row.android_placement_id)
            .bind(row.created_at)
            .bind(row.updated_at)
            .fetch_one(self.pool.as_ref())
            .await?;

        FeatureAdConfig::try_from(saved)
    }

    async fn insert_config_if_absent(&self, config: FeatureAdConfig) -> RepoResult<bool> {
        let row = FeatureAdConfigRow::try_from(&config)?;
        let sql = format!(
            r#"
            INSERT INTO feature_ad_configs ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (feature_name) DO NOTHING
            "#,
            CONFIG_COLUMNS
        );

        let result = sqlx::query(&sql)
            .bind(row.feature_name)
            .bind(row.feature_display_name)
            .bind(row.is_active)
            .bind(row.show_ad_after_use)
            .bind(row.ad_type)
            .bind(row.show_frequency)
            .bind(row.max_ads_per_day)
            .bind(row.skip_if_ad_seen_today)
            .bind(row.skip_for_premium)
            .bind(row.ios_placement_id)
            .bind(row.android_placement_id)
            .bind(row.created_at)
            .bind(row.updated_at)
            .execute(self.pool.as_ref())
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn load_tracker(&self, user_id: Uuid, today: NaiveDate) -> RepoResult<AdLimitTracker> {
        let mut transaction = self.begin_transaction().await?;

        match Self::lock_tracker(&mut transaction, user_id, today).await {
            Ok(tracker) => {
                transaction.commit().await?;
                Ok(tracker)
            }
            Err(e) => {
                rollback(transaction).await;
                Err(e)
            }
        }
    }

    async fn append_log(&self, entry: NewImpression, today: NaiveDate) -> RepoResult<AdImpressionLog> {
        let mut transaction = self.begin_transaction().await?;

        let result: RepoResult<AdImpressionLog> = async {
            let mut tracker = Self::lock_tracker(&mut transaction, entry.user_id, today).await?;

            let sql = format!(
                r#"
                INSERT INTO ad_impression_logs ({cols})
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING {cols}
                "#,
                cols = LOG_COLUMNS
            );
            let row = sqlx::query_as::<_, AdImpressionLogRow>(&sql)
                .bind(Uuid::new_v4())
                .bind(entry.user_id)
                .bind(&entry.feature)
                .bind(entry.ad_type.as_str())
                .bind(entry.platform.as_str())
                .bind(entry.status.as_str())
                .bind(&entry.placement_id)
                .bind(&entry.client.ip_address)
                .bind(&entry.client.user_agent)
                .bind(entry.created_at)
                .fetch_one(&mut *transaction)
                .await?;

            tracker.record_impression(&entry.feature, entry.status, entry.created_at);
            Self::store_tracker(&mut transaction, &tracker).await?;

            AdImpressionLog::try_from(row)
        }
        .await;

        match result {
            Ok(log) => {
                transaction.commit().await?;
                Ok(log)
            }
            Err(e) => {
                rollback(transaction).await;
                Err(e)
            }
        }
    }

    async fn has_impression_between(
        &self,
        user_id: Uuid,
        feature: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let (exists,): (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM ad_impression_logs
                WHERE user_id = $1 AND feature = $2 AND created_at >= $3 AND created_at < $4
            )
            "#,
        )
        .bind(user_id)
        .bind(feature)
        .bind(start)
        .bind(end)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(exists)
    }

    async fn impressions_between(
        &self,
        user_id: Option<Uuid>,
        feature: Option<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> RepoResult<Vec<AdImpressionLog>> {
        let mut query = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM ad_impression_logs WHERE created_at >= ",
            LOG_COLUMNS
        ));
        query.push_bind(start);
        query.push(" AND created_at < ").push_bind(end);
        if let Some(user_id) = user_id {
            query.push(" AND user_id = ").push_bind(user_id);
        }
        if let Some(feature) = feature {
            query.push(" AND feature = ").push_bind(feature);
        }
        query.push(" ORDER BY created_at");

        query
            .build_query_as::<AdImpressionLogRow>()
            .fetch_all(self.pool.as_ref())
            .await?
            .into_iter()
            .map(AdImpressionLog::try_from)
            .collect()
    }
}
