//! IP to country resolution.

use std::net::IpAddr;
use std::path::Path;

use maxminddb::{Reader, geoip2};
use tracing::{debug, info};

/// Resolves a viewer IP to a lower-cased English country name.
pub trait GeoResolver: Send + Sync {
    /// `None` when the address is unparsable or unknown.
    fn lookup(&self, ip: &str) -> Option<String>;
}

/// Geo disabled: every lookup is unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGeo;

impl GeoResolver for NoGeo {
    fn lookup(&self, _ip: &str) -> Option<String> {
        None
    }
}

#[derive(thiserror::Error, Debug)]
#[error("failed to open geo database {path}: {source}")]
pub struct GeoError {
    path: String,
    #[source]
    source: maxminddb::MaxMindDBError,
}

/// MaxMind GeoLite2 / GeoIP2 Country database, loaded into memory.
pub struct MaxMindResolver {
    reader: Reader<Vec<u8>>,
}

impl MaxMindResolver {
    pub fn open(path: &Path) -> Result<Self, GeoError> {
        let reader = Reader::open_readfile(path).map_err(|source| GeoError {
            path: path.display().to_string(),
            source,
        })?;
        info!(path = %path.display(), db = %reader.metadata.database_type, "opened geo database");
        Ok(Self { reader })
    }
}

impl GeoResolver for MaxMindResolver {
    fn lookup(&self, ip: &str) -> Option<String> {
        let addr: IpAddr = ip.trim().parse().ok()?;
        let record: geoip2::Country = match self.reader.lookup(addr) {
            Ok(record) => record,
            Err(e) => {
                debug!(ip, error = %e, "geo lookup missed");
                return None;
            }
        };
        let name = record.country?.names?.get("en").copied()?;
        Some(name.to_lowercase())
    }
}
