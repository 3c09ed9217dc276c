//! Storage layer: campaign rows with per-viewer targeting, and user profiles.
//!
//! The traits are what the selector and the ingestion handlers depend on;
//! [`AdStore`] is the DuckDB implementation of both.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use adserve_core::{CampaignAd, ExperienceLevel, ScheduledCampaignAd};

mod error;
pub use error::StoreError;

#[cfg(feature = "duckdb")]
mod duck;
#[cfg(feature = "duckdb")]
mod schema;
#[cfg(feature = "duckdb")]
pub use duck::AdStore;
#[cfg(feature = "duckdb")]
pub use schema::SCHEMA_VERSION;

/// Most tags returned for one user.
pub const MAX_USER_TAGS: usize = 50;

/// Scheduled campaigns.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Campaigns running at `now` that `user_id` is eligible for, in insertion
    /// order, with the targeting flags computed for that user.
    ///
    /// Without a user id only untargeted campaigns are eligible.
    async fn fetch_active(
        &self,
        now: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> Result<Vec<CampaignAd>, StoreError>;

    /// Insert a campaign and its targeting rows.
    ///
    /// Fails with [`StoreError::Duplicate`] when the id already exists.
    async fn add_campaign(&self, campaign: &ScheduledCampaignAd) -> Result<(), StoreError>;
}

/// Tags, experience level and segment of a user.
///
/// Missing rows are never errors: no tags is an empty list, no level is
/// [`ExperienceLevel::Unknown`], no segment is `None`.
#[async_trait]
pub trait UserProfileStore: Send + Sync {
    /// Up to [`MAX_USER_TAGS`] tags, most recently read first.
    async fn get_tags(&self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// Upsert tags, refreshing their `last_read` time to `now`.
    async fn set_tags(
        &self,
        user_id: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Delete tags not read since `older_than`. Returns the number removed.
    async fn delete_old_tags(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn get_experience_level(&self, user_id: &str) -> Result<ExperienceLevel, StoreError>;

    async fn set_experience_level(
        &self,
        user_id: &str,
        level: ExperienceLevel,
    ) -> Result<(), StoreError>;

    async fn delete_experience_level(&self, user_id: &str) -> Result<(), StoreError>;

    async fn get_segment(&self, user_id: &str) -> Result<Option<String>, StoreError>;

    async fn set_segment(&self, user_id: &str, segment: &str) -> Result<(), StoreError>;
}
