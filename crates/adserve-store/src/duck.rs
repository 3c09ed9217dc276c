//! DuckDB implementation of the campaign and user profile stores.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::{Connection, OptionalExt, params};
use tracing::{debug, info};

use adserve_core::{
    Ad, Breaker, BreakerConfig, CampaignAd, ExperienceLevel, ScheduledCampaignAd,
};

use crate::{CampaignStore, MAX_USER_TAGS, StoreError, UserProfileStore, schema};

/// Active campaigns for one user, already filtered by targeting eligibility.
///
/// Parameters: user id, user id, now, now.
const ACTIVE_CAMPAIGNS_SQL: &str = r#"
WITH active AS (
    SELECT
        a.*,
        EXISTS (SELECT 1 FROM ad_tags t WHERE t.ad_id = a.id) AS has_tags,
        EXISTS (
            SELECT 1 FROM ad_tags t
            JOIN user_tags u ON u.tag = t.tag
            WHERE t.ad_id = a.id AND u.user_id = ?
        ) AS tag_match,
        EXISTS (SELECT 1 FROM ad_experience_levels e WHERE e.ad_id = a.id) AS has_levels,
        EXISTS (
            SELECT 1 FROM ad_experience_levels e
            JOIN user_experience_levels u ON u.experience_level = e.experience_level
            WHERE e.ad_id = a.id AND u.user_id = ?
        ) AS level_match
    FROM ads a
    WHERE a."start" <= ? AND a."end" > ?
)
SELECT id, title, url, image, ratio, placeholder, source, company,
       probability, fallback, geo, tag_match, level_match
FROM active
WHERE (NOT has_tags OR tag_match) AND (NOT has_levels OR level_match)
ORDER BY seq
"#;

/// DuckDB store for campaigns and user profiles.
///
/// One connection behind a mutex; every query runs on the blocking pool under
/// the `db` breaker. Supports in-memory ([`open`](Self::open)) and file-backed
/// ([`open_persistent`](Self::open_persistent)) databases. Dropping the store
/// closes the connection; [`close`](Self::close) does it explicitly and reports
/// errors.
pub struct AdStore {
    conn: Arc<Mutex<Connection>>,
    breaker: Breaker,
}

impl AdStore {
    /// Open an in-memory DuckDB database.
    pub fn open() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Open or create a persistent DuckDB database at the given path.
    pub fn open_persistent(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            breaker: Breaker::new(BreakerConfig::new("db", Duration::from_millis(300))),
        }
    }

    /// Replace the default `db` breaker.
    pub fn with_breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = Breaker::new(config);
        self
    }

    /// Bring the schema up to [`SCHEMA_VERSION`](crate::SCHEMA_VERSION).
    pub fn migrate(&self) -> Result<u32, StoreError> {
        let mut conn = self.lock()?;
        let version = schema::migrate(&mut conn)?;
        info!(version, "schema up to date");
        Ok(version)
    }

    /// Applied schema version, 0 for an empty database.
    pub fn schema_version(&self) -> Result<u32, StoreError> {
        let conn = self.lock()?;
        schema::current_version(&conn)
    }

    /// Close the connection, surfacing any error DuckDB reports on close.
    pub fn close(self) -> Result<(), StoreError> {
        let mutex = Arc::try_unwrap(self.conn)
            .map_err(|_| StoreError::Other("connection still in use".into()))?;
        let conn = mutex
            .into_inner()
            .map_err(|e| StoreError::Other(format!("mutex poisoned: {e}")))?;
        conn.close().map_err(|(_, e)| StoreError::DuckDb(e))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::Other(format!("mutex poisoned: {e}")))
    }

    /// Run `f` against the connection on the blocking pool, under the breaker.
    ///
    /// Permanent errors such as duplicates are not charged to the circuit.
    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        self.breaker
            .call_blocking(
                move || {
                    let mut conn = conn
                        .lock()
                        .map_err(|e| StoreError::Other(format!("mutex poisoned: {e}")))?;
                    f(&mut conn)
                },
                |e: &StoreError| !e.is_permanent(),
            )
            .await
    }
}

#[async_trait]
impl CampaignStore for AdStore {
    async fn fetch_active(
        &self,
        now: DateTime<Utc>,
        user_id: Option<&str>,
    ) -> Result<Vec<CampaignAd>, StoreError> {
        let user_id = user_id.map(str::to_string);
        let now = now.naive_utc();
        let campaigns = self
            .run(move |conn| {
                let mut stmt = conn.prepare_cached(ACTIVE_CAMPAIGNS_SQL)?;
                let rows = stmt.query_map(params![user_id, user_id, now, now], |row| {
                    let geo: Option<String> = row.get(10)?;
                    let fallback: bool = row.get(9)?;
                    let provider_id = match (&geo, fallback) {
                        (_, true) => "",
                        (Some(_), false) => "direct targeted",
                        (None, false) => "direct",
                    };
                    Ok(CampaignAd {
                        ad: Ad {
                            description: row.get(1)?,
                            image_url: row.get(3)?,
                            click_url: row.get(2)?,
                            source_name: row.get(6)?,
                            company_name: row.get(7)?,
                            provider_id: provider_id.to_string(),
                        },
                        id: row.get(0)?,
                        ratio: row.get(4)?,
                        placeholder: row.get(5)?,
                        probability: row.get(8)?,
                        fallback,
                        geo: geo.unwrap_or_default(),
                        is_tag_targeted: row.get(11)?,
                        is_exp_targeted: row.get(12)?,
                    })
                })?;
                Ok(rows.collect::<Result<Vec<_>, _>>()?)
            })
            .await?;
        debug!(count = campaigns.len(), "fetched active campaigns");
        Ok(campaigns)
    }

    async fn add_campaign(&self, scheduled: &ScheduledCampaignAd) -> Result<(), StoreError> {
        let scheduled = scheduled.clone();
        let ad_id = scheduled.campaign.id.clone();
        self.run(move |conn| {
            let c = &scheduled.campaign;
            let exists: i64 = conn.query_row(
                "SELECT count(*) FROM ads WHERE id = ?",
                params![c.id],
                |row| row.get(0),
            )?;
            if exists > 0 {
                return Err(StoreError::Duplicate(c.id.clone()));
            }

            let geo = (!c.geo.is_empty()).then_some(c.geo.as_str());
            let tx = conn.transaction()?;
            tx.execute(
                r#"INSERT INTO ads (id, title, url, image, ratio, placeholder, source,
                    company, probability, fallback, geo, "start", "end")
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
                params![
                    c.id,
                    c.ad.description,
                    c.ad.click_url,
                    c.ad.image_url,
                    c.ratio,
                    c.placeholder,
                    c.ad.source_name,
                    c.ad.company_name,
                    c.probability,
                    c.fallback,
                    geo,
                    scheduled.start.naive_utc(),
                    scheduled.end.naive_utc(),
                ],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO ad_tags (ad_id, tag) VALUES (?, ?) ON CONFLICT DO NOTHING",
                )?;
                for tag in &scheduled.tags {
                    stmt.execute(params![c.id, tag])?;
                }
                let mut stmt = tx.prepare(
                    "INSERT INTO ad_experience_levels (ad_id, experience_level) VALUES (?, ?)
                     ON CONFLICT DO NOTHING",
                )?;
                for level in scheduled
                    .experience_levels
                    .iter()
                    .filter(|l| **l != ExperienceLevel::Unknown)
                {
                    stmt.execute(params![c.id, level.as_str()])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        info!(ad = %ad_id, "added campaign");
        Ok(())
    }
}

#[async_trait]
impl UserProfileStore for AdStore {
    async fn get_tags(&self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT tag FROM user_tags WHERE user_id = ?
                 ORDER BY last_read DESC, tag LIMIT ?",
            )?;
            let rows = stmt.query_map(params![user_id, MAX_USER_TAGS as i64], |row| row.get(0))?;
            Ok(rows.collect::<Result<Vec<String>, _>>()?)
        })
        .await
    }

    async fn set_tags(
        &self,
        user_id: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut unique: Vec<String> = Vec::with_capacity(tags.len());
        for tag in tags {
            if !tag.is_empty() && !unique.contains(tag) {
                unique.push(tag.clone());
            }
        }
        if unique.is_empty() {
            return Ok(());
        }
        let user_id = user_id.to_string();
        let now = now.naive_utc();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO user_tags (user_id, tag, last_read) VALUES (?, ?, ?)
                     ON CONFLICT (user_id, tag) DO UPDATE SET last_read = excluded.last_read",
                )?;
                for tag in &unique {
                    stmt.execute(params![user_id, tag, now])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_old_tags(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
        let older_than = older_than.naive_utc();
        let deleted = self
            .run(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM user_tags WHERE last_read < ?",
                    params![older_than],
                )?)
            })
            .await?;
        info!(deleted, "deleted old user tags");
        Ok(deleted)
    }

    async fn get_experience_level(&self, user_id: &str) -> Result<ExperienceLevel, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            let level: Option<String> = conn
                .query_row(
                    "SELECT experience_level FROM user_experience_levels WHERE user_id = ?",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(level
                .map(|l| ExperienceLevel::parse(&l))
                .unwrap_or_default())
        })
        .await
    }

    async fn set_experience_level(
        &self,
        user_id: &str,
        level: ExperienceLevel,
    ) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let now = Utc::now().naive_utc();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO user_experience_levels (user_id, experience_level, d_update)
                 VALUES (?, ?, ?)
                 ON CONFLICT (user_id) DO UPDATE SET
                    experience_level = excluded.experience_level,
                    d_update = excluded.d_update",
                params![user_id, level.as_str(), now],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_experience_level(&self, user_id: &str) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM user_experience_levels WHERE user_id = ?",
                params![user_id],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_segment(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let user_id = user_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT segment FROM user_segments WHERE user_id = ?",
                    params![user_id],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn set_segment(&self, user_id: &str, segment: &str) -> Result<(), StoreError> {
        let user_id = user_id.to_string();
        let segment = segment.to_string();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO user_segments (user_id, segment) VALUES (?, ?)
                 ON CONFLICT (user_id) DO UPDATE SET segment = excluded.segment",
                params![user_id, segment],
            )?;
            Ok(())
        })
        .await
    }
}
