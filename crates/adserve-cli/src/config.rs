//! Runtime configuration: flags with environment fallbacks.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use adserve_core::{BreakerConfig, Placements};
use adserve_providers::{bsa, ethicalads};

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// DuckDB database file; in-memory when unset
    #[arg(long, env = "ADSERVE_DB")]
    pub db: Option<PathBuf>,

    /// Store query timeout in milliseconds
    #[arg(long, env = "DB_TIMEOUT_MS", default_value_t = 300)]
    pub db_timeout_ms: u64,
}

impl StoreArgs {
    pub fn breaker(&self) -> BreakerConfig {
        BreakerConfig::new("db", Duration::from_millis(self.db_timeout_ms))
    }
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 9090)]
    pub port: u16,

    /// MaxMind country database; geo lookups are disabled when unset
    #[arg(long, env = "GEOIP_DB")]
    pub geoip_db: Option<PathBuf>,

    /// JSON file overriding placement keys
    #[arg(long, env = "ADSERVE_PLACEMENTS")]
    pub placements: Option<PathBuf>,

    /// Probability of asking EthicalAds before the routed BSA placement
    #[arg(long, env = "SECONDARY_FIRST_RATIO", default_value_t = 0.0)]
    pub secondary_first_ratio: f32,

    #[arg(long, env = "BSA_BASE_URL", default_value = bsa::DEFAULT_BASE_URL)]
    pub bsa_base_url: String,

    #[arg(long, env = "BSA_TIMEOUT_MS", default_value_t = 700)]
    pub bsa_timeout_ms: u64,

    #[arg(long, env = "ETHICALADS_BASE_URL", default_value = ethicalads::DEFAULT_BASE_URL)]
    pub ethicalads_base_url: String,

    #[arg(long, env = "ETHICALADS_TOKEN", default_value = "", hide_env_values = true)]
    pub ethicalads_token: String,

    #[arg(long, env = "ETHICALADS_TIMEOUT_MS", default_value_t = 700)]
    pub ethicalads_timeout_ms: u64,
}

impl ServeArgs {
    pub fn bsa_breaker(&self) -> BreakerConfig {
        BreakerConfig::new("BSA", Duration::from_millis(self.bsa_timeout_ms))
    }

    pub fn ethicalads_breaker(&self) -> BreakerConfig {
        BreakerConfig::new("EthicalAds", Duration::from_millis(self.ethicalads_timeout_ms))
    }

    /// Placement keys: defaults, overridden by the JSON file when given.
    pub fn placements(&self) -> anyhow::Result<Placements> {
        match &self.placements {
            Some(path) => load_placements(path),
            None => Ok(Placements::default()),
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct BackgroundArgs {
    /// Port the push endpoints listen on
    #[arg(long, env = "PORT", default_value_t = 9090)]
    pub port: u16,
}

fn load_placements(path: &Path) -> anyhow::Result<Placements> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading placements file {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("parsing placements file {}", path.display()))
}
