//! Versioned DDL for the ad database.
//!
//! Migrations run in order inside one transaction each; the applied version is
//! recorded in `schema_migrations`, so running them again is a no-op.

use duckdb::{Connection, OptionalExt, params};
use tracing::info;

use crate::StoreError;

/// Latest schema version.
pub const SCHEMA_VERSION: u32 = 3;

const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        r#"
        CREATE SEQUENCE ads_seq START 1;
        CREATE TABLE ads (
            seq BIGINT NOT NULL DEFAULT nextval('ads_seq'),
            id VARCHAR PRIMARY KEY,
            title VARCHAR NOT NULL,
            url VARCHAR NOT NULL,
            image VARCHAR NOT NULL,
            ratio FLOAT NOT NULL,
            placeholder VARCHAR NOT NULL,
            source VARCHAR NOT NULL,
            company VARCHAR NOT NULL,
            probability FLOAT NOT NULL,
            fallback BOOLEAN NOT NULL,
            geo VARCHAR,
            "start" TIMESTAMP NOT NULL,
            "end" TIMESTAMP NOT NULL
        );
        "#,
    ),
    (
        2,
        r#"
        CREATE TABLE user_tags (
            user_id VARCHAR NOT NULL,
            tag VARCHAR NOT NULL,
            last_read TIMESTAMP NOT NULL,
            PRIMARY KEY (user_id, tag)
        );
        CREATE TABLE ad_tags (
            ad_id VARCHAR NOT NULL,
            tag VARCHAR NOT NULL,
            PRIMARY KEY (ad_id, tag)
        );
        CREATE TABLE user_segments (
            user_id VARCHAR PRIMARY KEY,
            segment VARCHAR NOT NULL
        );
        "#,
    ),
    (
        3,
        r#"
        CREATE TABLE user_experience_levels (
            user_id VARCHAR PRIMARY KEY,
            experience_level VARCHAR NOT NULL,
            d_update TIMESTAMP NOT NULL
        );
        CREATE TABLE ad_experience_levels (
            ad_id VARCHAR NOT NULL,
            experience_level VARCHAR NOT NULL,
            PRIMARY KEY (ad_id, experience_level)
        );
        "#,
    ),
];

/// Currently applied version, 0 for an empty database.
pub(crate) fn current_version(conn: &Connection) -> Result<u32, StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT current_timestamp
        )",
    )?;
    let version: Option<i32> = conn
        .query_row("SELECT max(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0).max(0) as u32)
}

/// Apply every migration newer than the current version.
pub(crate) fn migrate(conn: &mut Connection) -> Result<u32, StoreError> {
    let mut version = current_version(conn)?;
    for &(target, ddl) in MIGRATIONS {
        if target <= version {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(ddl)?;
        tx.execute(
            "INSERT INTO schema_migrations (version) VALUES (?)",
            params![target as i32],
        )?;
        tx.commit()?;
        info!(version = target, "applied migration");
        version = target;
    }
    Ok(version)
}
