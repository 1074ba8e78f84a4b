use chrono::{DateTime, NaiveDate, Utc};
use sqlx::types::Json;
use sqlx::FromRow;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::ads::types::UnknownVariant;
use crate::ads::{AdImpressionLog, AdLimitTracker, FeatureAdConfig};
use crate::error::DatabaseError;

fn parse_column<T>(value: &str) -> Result<T, DatabaseError>
where
    T: FromStr<Err = UnknownVariant>,
{
    value
        .parse()
        .map_err(|e: UnknownVariant| DatabaseError::QueryError(e.to_string()))
}

fn to_count(value: i32, column: &str) -> Result<u32, DatabaseError> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::QueryError(format!("negative {}: {}", column, value)))
}

fn to_column(value: u32, column: &str) -> Result<i32, DatabaseError> {
    i32::try_from(value)
        .map_err(|_| DatabaseError::QueryError(format!("{} out of range: {}", column, value)))
}

#[derive(Debug, Clone, FromRow)]
pub struct FeatureAdConfigRow {
    pub feature_name: String,
    pub feature_display_name: String,
    pub is_active: bool,
    pub show_ad_after_use: bool,
    pub ad_type: String,
    pub show_frequency: i32,
    pub max_ads_per_day: i32,
    pub skip_if_ad_seen_today: bool,
    pub skip_for_premium: bool,
    pub ios_placement_id: Option<String>,
    pub android_placement_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<FeatureAdConfigRow> for FeatureAdConfig {
    type Error = DatabaseError;

    fn try_from(row: FeatureAdConfigRow) -> Result<Self, Self::Error> {
        Ok(Self {
            feature_name: row.feature_name,
            feature_display_name: row.feature_display_name,
            is_active: row.is_active,
            show_ad_after_use: row.show_ad_after_use,
            ad_type: parse_column(&row.ad_type)?,
            show_frequency: to_count(row.show_frequency, "show_frequency")?,
            max_ads_per_day: to_count(row.max_ads_per_day, "max_ads_per_day")?,
            skip_if_ad_seen_today: row.skip_if_ad_seen_today,
            skip_for_premium: row.skip_for_premium,
            ios_placement_id: row.ios_placement_id,
            android_placement_id: row.android_placement_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<&FeatureAdConfig> for FeatureAdConfigRow {
    type Error = DatabaseError;

    fn try_from(config: &FeatureAdConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            feature_name: config.feature_name.clone(),
            feature_display_name: config.feature_display_name.clone(),
            is_active: config.is_active,
            show_ad_after_use: config.show_ad_after_use,
            ad_type: config.ad_type.as_str().to_string(),
            show_frequency: to_column(config.show_frequency, "show_frequency")?,
            max_ads_per_day: to_column(config.max_ads_per_day, "max_ads_per_day")?,
            skip_if_ad_seen_today: config.skip_if_ad_seen_today,
            skip_for_premium: config.skip_for_premium,
            ios_placement_id: config.ios_placement_id.clone(),
            android_placement_id: config.android_placement_id.clone(),
            created_at: config.created_at,
            updated_at: config.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AdLimitTrackerRow {
    pub user_id: Uuid,
    pub ads_shown_today: i32,
    pub feature_use_counts: Json<HashMap<String, i32>>,
    pub last_ad_shown: Option<DateTime<Utc>>,
    pub last_reset_date: NaiveDate,
}

impl TryFrom<AdLimitTrackerRow> for AdLimitTracker {
    type Error = DatabaseError;

    fn try_from(row: AdLimitTrackerRow) -> Result<Self, Self::Error> {
        let feature_use_counts = row
            .feature_use_counts
            .0
            .into_iter()
            .map(|(feature, count)| Ok((feature, to_count(count, "feature use count")?)))
            .collect::<Result<HashMap<_, _>, DatabaseError>>()?;

        Ok(Self {
            user_id: row.user_id,
            ads_shown_today: to_count(row.ads_shown_today, "ads_shown_today")?,
            feature_use_counts,
            last_ad_shown: row.last_ad_shown,
            last_reset_date: row.last_reset_date,
        })
    }
}

impl TryFrom<&AdLimitTracker> for AdLimitTrackerRow {
    type Error = DatabaseError;

    fn try_from(tracker: &AdLimitTracker) -> Result<Self, Self::Error> {
        let feature_use_counts = tracker
            .feature_use_counts
            .iter()
            .map(|(feature, count)| Ok((feature.clone(), to_column(*count, "feature use count")?)))
            .collect::<Result<HashMap<_, _>, DatabaseError>>()?;

        Ok(Self {
            user_id: tracker.user_id,
            ads_shown_today: to_column(tracker.ads_shown_today, "ads_shown_today")?,
            feature_use_counts: Json(feature_use_counts),
            last_ad_shown: tracker.last_ad_shown,
            last_reset_date: tracker.last_reset_date,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AdImpressionLogRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub feature: String,
    pub ad_type: String,
    pub platform: String,
    pub status: String,
    pub placement_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AdImpressionLogRow> for AdImpressionLog {
    type Error = DatabaseError;

    fn try_from(row: AdImpressionLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            feature: row.feature,
            ad_type: parse_column(&row.ad_type)?,
            platform: parse_column(&row.platform)?,
            status: parse_column(&row.status)?,
            placement_id: row.placement_id,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            created_at: row.created_at,
        })
    }
}
