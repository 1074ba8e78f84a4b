use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} '{value}', expected one of: {expected}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub expected: &'static str,
}

macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                        expected: concat!($($text, " "),+).trim_end(),
                    }),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdType {
    Interstitial,
    Rewarded,
    Banner,
}

text_enum!(AdType, "ad type", {
    Interstitial => "interstitial",
    Rewarded => "rewarded",
    Banner => "banner",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

text_enum!(Platform, "platform", {
    Ios => "ios",
    Android => "android",
});

/// What the client reports having done with an ad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpressionStatus {
    Shown,
    Clicked,
    Closed,
    Skipped,
    Completed,
    Failed,
}

text_enum!(ImpressionStatus, "status", {
    Shown => "shown",
    Clicked => "clicked",
    Closed => "closed",
    Skipped => "skipped",
    Completed => "completed",
    Failed => "failed",
});

/// Per-feature ad rules, managed by administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureAdConfig {
    pub feature_name: String,
    pub feature_display_name: String,
    pub is_active: bool,
    pub show_ad_after_use: bool,
    pub ad_type: AdType,
    /// Show an ad on every Nth use of the feature.
    pub show_frequency: u32,
    pub max_ads_per_day: u32,
    pub skip_if_ad_seen_today: bool,
    pub skip_for_premium: bool,
    pub ios_placement_id: Option<String>,
    pub android_placement_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FeatureAdConfig {
    pub fn new(feature_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        let feature_name = feature_name.into();
        Self {
            feature_display_name: feature_name.clone(),
            feature_name,
            is_active: true,
            show_ad_after_use: true,
            ad_type: AdType::Interstitial,
            show_frequency: 1,
            max_ads_per_day: 10,
            skip_if_ad_seen_today: false,
            skip_for_premium: true,
            ios_placement_id: None,
            android_placement_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Placement configured for `platform`; blank identifiers count as missing.
    pub fn placement_for(&self, platform: Platform) -> Option<String> {
        let id = match platform {
            Platform::Ios => self.ios_placement_id.as_ref(),
            Platform::Android => self.android_placement_id.as_ref(),
        };
        id.filter(|id| !id.trim().is_empty()).cloned()
    }

    pub fn placement_ids(&self) -> PlacementIds {
        PlacementIds {
            ios: self.placement_for(Platform::Ios),
            android: self.placement_for(Platform::Android),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementIds {
    pub ios: Option<String>,
    pub android: Option<String>,
}

/// Caller-supplied request metadata stored verbatim with an impression.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: String,
}

/// An impression about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewImpression {
    pub user_id: Uuid,
    pub feature: String,
    pub ad_type: AdType,
    pub platform: Platform,
    pub status: ImpressionStatus,
    pub placement_id: Option<String>,
    pub client: ClientMeta,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one ad event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdImpressionLog {
    pub id: Uuid,
    pub user_id: Uuid,
    pub feature: String,
    pub ad_type: AdType,
    pub platform: Platform,
    pub status: ImpressionStatus,
    pub placement_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: String,
    pub created_at: DateTime<Utc>,
}

impl AdImpressionLog {
    pub fn from_new(id: Uuid, entry: NewImpression) -> Self {
        Self {
            id,
            user_id: entry.user_id,
            feature: entry.feature,
            ad_type: entry.ad_type,
            platform: entry.platform,
            status: entry.status,
            placement_id: entry.placement_id,
            ip_address: entry.client.ip_address,
            user_agent: entry.client.user_agent,
            created_at: entry.created_at,
        }
    }
}
