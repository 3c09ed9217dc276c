//! Ad types shared by the store, the provider clients and the HTTP surface.
//!
//! Wire names follow the served JSON: keys are lower camel case and a few
//! fields keep their historical short names (`image`, `link`, `source`,
//! `company`).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fields common to every ad, whatever its source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Ad {
    #[serde(alias = "title")]
    pub description: String,
    #[serde(rename = "image")]
    pub image_url: String,
    #[serde(rename = "link", alias = "url")]
    pub click_url: String,
    #[serde(rename = "source")]
    pub source_name: String,
    #[serde(rename = "company")]
    pub company_name: String,
    pub provider_id: String,
}

/// An ad returned by a third-party network, with its tracking extras.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProviderAd {
    #[serde(flatten)]
    pub ad: Ad,
    pub pixel: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub referral_link: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub tag_line: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub background_color: String,
}

/// A direct-sold campaign row as seen by one viewer.
///
/// `is_tag_targeted` and `is_exp_targeted` are computed per request against
/// the viewer's tags and experience level; they are never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CampaignAd {
    #[serde(flatten)]
    pub ad: Ad,
    pub id: String,
    pub placeholder: String,
    pub ratio: f32,
    #[serde(skip_serializing_if = "is_zero")]
    pub probability: f32,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub geo: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_tag_targeted: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_exp_targeted: bool,
}

fn is_zero(v: &f32) -> bool {
    *v == 0.0
}

/// A campaign with its schedule and targeting, as published by the campaign
/// service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledCampaignAd {
    #[serde(flatten)]
    pub campaign: CampaignAd,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Tags the campaign targets. Empty means no tag targeting.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Experience levels the campaign targets. Empty means no level targeting.
    #[serde(default)]
    pub experience_levels: Vec<ExperienceLevel>,
}

impl ScheduledCampaignAd {
    /// Whether the campaign is running at `now` (`start <= now < end`).
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }
}

/// The single element of a non-empty ad response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ServedAd {
    Campaign(CampaignAd),
    Provider(ProviderAd),
}

impl ServedAd {
    pub fn ad(&self) -> &Ad {
        match self {
            Self::Campaign(c) => &c.ad,
            Self::Provider(p) => &p.ad,
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.ad().provider_id
    }
}

impl From<CampaignAd> for ServedAd {
    fn from(c: CampaignAd) -> Self {
        Self::Campaign(c)
    }
}

impl From<ProviderAd> for ServedAd {
    fn from(p: ProviderAd) -> Self {
        Self::Provider(p)
    }
}

/// Self-declared years of experience of a viewer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExperienceLevel {
    #[serde(rename = "LESS_THAN_1_YEAR")]
    LessThan1Year,
    #[serde(rename = "MORE_THAN_1_YEAR")]
    MoreThan1Year,
    #[serde(rename = "MORE_THAN_2_YEARS")]
    MoreThan2Years,
    #[serde(rename = "MORE_THAN_4_YEARS")]
    MoreThan4Years,
    #[serde(rename = "MORE_THAN_6_YEARS")]
    MoreThan6Years,
    #[serde(rename = "MORE_THAN_10_YEARS")]
    MoreThan10Years,
    #[serde(rename = "NOT_ENGINEER")]
    NotEngineer,
    #[default]
    #[serde(rename = "UNKNOWN", other)]
    Unknown,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LessThan1Year => "LESS_THAN_1_YEAR",
            Self::MoreThan1Year => "MORE_THAN_1_YEAR",
            Self::MoreThan2Years => "MORE_THAN_2_YEARS",
            Self::MoreThan4Years => "MORE_THAN_4_YEARS",
            Self::MoreThan6Years => "MORE_THAN_6_YEARS",
            Self::MoreThan10Years => "MORE_THAN_10_YEARS",
            Self::NotEngineer => "NOT_ENGINEER",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse a stored level. Anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "LESS_THAN_1_YEAR" => Self::LessThan1Year,
            "MORE_THAN_1_YEAR" => Self::MoreThan1Year,
            "MORE_THAN_2_YEARS" => Self::MoreThan2Years,
            "MORE_THAN_4_YEARS" => Self::MoreThan4Years,
            "MORE_THAN_6_YEARS" => Self::MoreThan6Years,
            "MORE_THAN_10_YEARS" => Self::MoreThan10Years,
            "NOT_ENGINEER" => Self::NotEngineer,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ExperienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the selector knows about the viewer of one page view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Viewer {
    pub user_id: Option<String>,
    /// Lower-cased country name; empty when the IP could not be resolved.
    pub country: String,
    /// Most recently read first.
    pub tags: Vec<String>,
    pub segment: Option<String>,
}
