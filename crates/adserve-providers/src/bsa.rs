//! BuySellAds (Carbon) client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use adserve_core::{Ad, Breaker, BreakerConfig, ProviderAd};

use crate::{PlacementProvider, ProviderError, ProviderRequest, check_status};

pub const DEFAULT_BASE_URL: &str = "https://srv.buysellads.com";

/// Segment sent with every request; identifies the publisher surface.
const SEGMENT: &str = "placement:dailynowco";

#[derive(Deserialize)]
struct BsaResponse {
    #[serde(default, alias = "Ads")]
    ads: Vec<Map<String, Value>>,
}

pub struct BsaClient {
    client: reqwest::Client,
    base_url: String,
    breaker: Breaker,
}

impl BsaClient {
    /// `base_url` should be like `https://srv.buysellads.com` (no trailing slash).
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            breaker: Breaker::new(BreakerConfig::new("BSA", Duration::from_millis(700))),
        }
    }

    pub fn with_breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = Breaker::new(config);
        self
    }

    async fn request(
        &self,
        request: &ProviderRequest,
        placement: &str,
    ) -> Result<Vec<Map<String, Value>>, ProviderError> {
        let url = format!("{}/ads/{}.json", self.base_url, placement);
        self.breaker
            .call(async {
                let resp = self
                    .client
                    .get(&url)
                    .query(&[
                        ("segment", SEGMENT),
                        ("forwardedip", request.ip.as_str()),
                        ("useragent", request.user_agent.as_str()),
                    ])
                    .send()
                    .await?;
                let parsed: BsaResponse = check_status(resp).await?.json().await?;
                Ok::<_, ProviderError>(parsed.ads)
            })
            .await
    }
}

#[async_trait]
impl PlacementProvider for BsaClient {
    async fn fetch(
        &self,
        request: &ProviderRequest,
        placement: &str,
    ) -> Result<Option<ProviderAd>, ProviderError> {
        let ads = self.request(request, placement).await?;
        let ad = ads.iter().find(|ad| ad.contains_key("statlink")).map(to_provider_ad);
        debug!(placement, found = ad.is_some(), "BSA response");
        Ok(ad)
    }

    async fn raw_ads(
        &self,
        request: &ProviderRequest,
        placement: &str,
    ) -> Result<Vec<Map<String, Value>>, ProviderError> {
        self.request(request, placement).await
    }
}

fn text<'a>(ad: &'a Map<String, Value>, key: &str) -> &'a str {
    ad.get(key).and_then(Value::as_str).unwrap_or_default()
}

fn first_non_empty<'a>(a: &'a str, b: &'a str) -> &'a str {
    if a.is_empty() { b } else { a }
}

fn to_provider_ad(ad: &Map<String, Value>) -> ProviderAd {
    let mut link = text(ad, "statlink").to_string();
    if !link.starts_with("https:") {
        link.insert_str(0, "https:");
    }

    let timestamp = match ad.get("timestamp") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let pixel = ad
        .get("pixel")
        .and_then(Value::as_str)
        .map(|p| {
            p.split("||")
                .map(|url| url.replace("[timestamp]", &timestamp))
                .collect()
        })
        .unwrap_or_default();

    ProviderAd {
        ad: Ad {
            description: first_non_empty(text(ad, "description"), text(ad, "title")).to_string(),
            image_url: first_non_empty(text(ad, "smallImage"), text(ad, "image")).to_string(),
            click_url: link,
            source_name: "Carbon".into(),
            company_name: first_non_empty(text(ad, "company"), "Carbon").to_string(),
            provider_id: "carbon".into(),
        },
        pixel,
        referral_link: text(ad, "ad_via_link").to_string(),
        tag_line: text(ad, "companyTagline").to_string(),
        background_color: text(ad, "backgroundColor").to_string(),
    }
}
