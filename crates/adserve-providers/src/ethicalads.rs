//! EthicalAds decision API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use adserve_core::{Ad, Breaker, BreakerConfig, ProviderAd};

use crate::{KeywordProvider, ProviderError, ProviderRequest, check_status};

pub const DEFAULT_BASE_URL: &str = "https://server.ethicalads.io";

const PUBLISHER: &str = "dailydev";
const REFERRAL_LINK: &str = "https://www.ethicalads.io/?ref=dailydev";

#[derive(Serialize)]
struct Placement {
    div_id: &'static str,
    ad_type: &'static str,
}

#[derive(Serialize)]
struct DecisionRequest<'a> {
    publisher: &'static str,
    placements: [Placement; 1],
    campaign_types: [&'static str; 1],
    user_ip: &'a str,
    user_ua: &'a str,
    keywords: &'a [String],
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct DecisionResponse {
    body: String,
    image: String,
    link: String,
    view_url: String,
}

pub struct EthicalAdsClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    breaker: Breaker,
}

impl EthicalAdsClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            breaker: Breaker::new(BreakerConfig::new("EthicalAds", Duration::from_millis(700))),
        }
    }

    pub fn with_breaker(mut self, config: BreakerConfig) -> Self {
        self.breaker = Breaker::new(config);
        self
    }
}

#[async_trait]
impl KeywordProvider for EthicalAdsClient {
    async fn fetch(
        &self,
        request: &ProviderRequest,
        keywords: &[String],
    ) -> Result<Option<ProviderAd>, ProviderError> {
        let url = format!("{}/api/v1/decision/", self.base_url);
        let body = DecisionRequest {
            publisher: PUBLISHER,
            placements: [Placement {
                div_id: "ad-div-1",
                ad_type: "image-v1",
            }],
            campaign_types: ["paid"],
            user_ip: &request.ip,
            user_ua: &request.user_agent,
            keywords,
        };

        let decision = self
            .breaker
            .call(async {
                let resp = self
                    .client
                    .post(&url)
                    .header(reqwest::header::AUTHORIZATION, format!("Token {}", self.token))
                    .json(&body)
                    .send()
                    .await?;
                // No decision for this viewer.
                if resp.status() == StatusCode::NOT_FOUND {
                    return Ok::<_, ProviderError>(DecisionResponse::default());
                }
                let decision: DecisionResponse = check_status(resp).await?.json().await?;
                Ok::<_, ProviderError>(decision)
            })
            .await?;

        debug!(found = !decision.body.is_empty(), "EthicalAds decision");
        if decision.body.is_empty() {
            return Ok(None);
        }
        Ok(Some(ProviderAd {
            ad: Ad {
                description: decision.body,
                image_url: decision.image,
                click_url: decision.link,
                source_name: "EthicalAds".into(),
                company_name: "EthicalAds".into(),
                provider_id: "ethical".into(),
            },
            pixel: vec![decision.view_url],
            referral_link: REFERRAL_LINK.into(),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn viewer() -> ProviderRequest {
        ProviderRequest {
            ip: "210.151.1.1".into(),
            user_agent: "Mozilla/5.0 (test)".into(),
        }
    }

    fn client(server: &MockServer) -> EthicalAdsClient {
        EthicalAdsClient::new(reqwest::Client::new(), server.uri(), "secret")
    }

    #[tokio::test]
    async fn sends_decision_request_and_maps_ad() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/decision/"))
            .and(header("authorization", "Token secret"))
            .and(body_partial_json(json!({
                "publisher": "dailydev",
                "placements": [{"div_id": "ad-div-1", "ad_type": "image-v1"}],
                "campaign_types": ["paid"],
                "user_ip": "210.151.1.1",
                "user_ua": "Mozilla/5.0 (test)",
                "keywords": ["rust", "webdev"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ad-1",
                "body": "Monitoring for developers",
                "image": "https://media/ea.png",
                "link": "https://server.ethicalads.io/proxy/click/1",
                "view_url": "https://server.ethicalads.io/proxy/view/1",
                "nonce": "abc"
            })))
            .mount(&server)
            .await;

        let keywords = vec!["rust".to_string(), "webdev".to_string()];
        let ad = client(&server)
            .fetch(&viewer(), &keywords)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ad.ad.description, "Monitoring for developers");
        assert_eq!(ad.ad.image_url, "https://media/ea.png");
        assert_eq!(ad.ad.click_url, "https://server.ethicalads.io/proxy/click/1");
        assert_eq!(ad.ad.company_name, "EthicalAds");
        assert_eq!(ad.ad.source_name, "EthicalAds");
        assert_eq!(ad.ad.provider_id, "ethical");
        assert_eq!(ad.pixel, vec!["https://server.ethicalads.io/proxy/view/1"]);
        assert_eq!(ad.referral_link, REFERRAL_LINK);
    }

    #[tokio::test]
    async fn not_found_means_no_ad() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        assert!(client(&server).fetch(&viewer(), &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_body_means_no_ad() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .mount(&server)
            .await;
        assert!(client(&server).fetch(&viewer(), &[]).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn server_error_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;
        let err = client(&server).fetch(&viewer(), &[]).await.unwrap_err();
        assert!(matches!(err, ProviderError::Server { status: 503, ref body } if body == "down"));
    }
}
