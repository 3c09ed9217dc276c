//! Third-party ad networks: BuySellAds (Carbon) and EthicalAds.
//!
//! Each client owns its own [`Breaker`](adserve_core::Breaker) so a slow or
//! failing network is isolated from the others. Callers see a plain
//! [`ProviderError`] and treat any error as "no ad from this network".

use async_trait::async_trait;
use serde_json::{Map, Value};

use adserve_core::{BreakerError, ProviderAd};

pub mod bsa;
pub mod ethicalads;

pub use bsa::BsaClient;
pub use ethicalads::EthicalAdsClient;

#[derive(thiserror::Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Breaker(#[from] BreakerError),
}

/// The viewer as forwarded to an ad network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRequest {
    pub ip: String,
    pub user_agent: String,
}

/// A network addressed by placement key (BuySellAds).
#[async_trait]
pub trait PlacementProvider: Send + Sync {
    /// First servable ad for `placement`, `None` when the network has none.
    async fn fetch(
        &self,
        request: &ProviderRequest,
        placement: &str,
    ) -> Result<Option<ProviderAd>, ProviderError>;

    /// The network's ad objects for `placement`, untouched.
    async fn raw_ads(
        &self,
        request: &ProviderRequest,
        placement: &str,
    ) -> Result<Vec<Map<String, Value>>, ProviderError>;
}

/// A network addressed by keywords (EthicalAds).
#[async_trait]
pub trait KeywordProvider: Send + Sync {
    async fn fetch(
        &self,
        request: &ProviderRequest,
        keywords: &[String],
    ) -> Result<Option<ProviderAd>, ProviderError>;
}

/// Turn a non-2xx response into [`ProviderError::Server`].
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Server {
        status: status.as_u16(),
        body,
    })
}
