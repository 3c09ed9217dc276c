//! Push-subscription ingestion.
//!
//! The message queue delivers each message as an HTTP POST to
//! `/{subscription}` carrying a push envelope whose `message.data` is the
//! base64-encoded JSON payload. A 2xx response acks the message and a 5xx
//! nacks it for redelivery.
//!
//! Payloads that can never be applied (bad envelope, bad base64, bad JSON, a
//! campaign id that already exists) are logged and acked. Store failures that
//! may succeed later are nacked.

use std::fmt;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{error, info, warn};

use adserve_core::{ExperienceLevel, ScheduledCampaignAd};
use adserve_store::{CampaignStore, StoreError, UserProfileStore};

/// Tags not read for this long are purged.
pub const TAG_RETENTION_DAYS: i64 = 180;

#[derive(thiserror::Error, Debug)]
pub enum IngestError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    /// Whether redelivery could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Malformed(_) => false,
            Self::Store(e) => !e.is_permanent(),
        }
    }
}

/// The subscriptions this service consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    NewAd,
    Views,
    ExperienceLevelSet,
    ExperienceLevelUnset,
    SegmentFound,
    DeleteOldTags,
}

impl Subscription {
    pub const ALL: [Subscription; 6] = [
        Self::NewAd,
        Self::Views,
        Self::ExperienceLevelSet,
        Self::ExperienceLevelUnset,
        Self::SegmentFound,
        Self::DeleteOldTags,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::NewAd => "monetization-new-ad",
            Self::Views => "monetization-views",
            Self::ExperienceLevelSet => "monetization-experience-level-set",
            Self::ExperienceLevelUnset => "monetization-experience-level-unset",
            Self::SegmentFound => "monetization-segment-found",
            Self::DeleteOldTags => "monetization-delete-old-tags",
        }
    }

    /// Accepts the bare name or a full `projects/{p}/subscriptions/{name}` path.
    pub fn from_name(name: &str) -> Option<Self> {
        let short = name.rsplit('/').next().unwrap_or(name);
        Self::ALL.into_iter().find(|s| s.name() == short)
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Wire types ──

#[derive(Deserialize)]
struct PushEnvelope {
    message: PushMessage,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PushMessage {
    #[serde(default)]
    data: String,
    #[serde(default, alias = "message_id")]
    message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ViewMessage {
    user_id: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExperienceLevelMessage {
    user_id: String,
    #[serde(default)]
    experience_level: ExperienceLevel,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserMessage {
    user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SegmentMessage {
    user_id: String,
    segment: String,
}

fn parse<T: DeserializeOwned>(data: &[u8]) -> Result<T, IngestError> {
    serde_json::from_slice(data).map_err(|e| IngestError::Malformed(e.to_string()))
}

// ── Handlers ──

/// Applies decoded messages to the stores.
pub struct Ingestor {
    campaigns: Arc<dyn CampaignStore>,
    profiles: Arc<dyn UserProfileStore>,
    tag_retention: Duration,
}

impl Ingestor {
    pub fn new(campaigns: Arc<dyn CampaignStore>, profiles: Arc<dyn UserProfileStore>) -> Self {
        Self {
            campaigns,
            profiles,
            tag_retention: Duration::days(TAG_RETENTION_DAYS),
        }
    }

    pub fn with_tag_retention(mut self, retention: Duration) -> Self {
        self.tag_retention = retention;
        self
    }

    /// Apply one decoded payload.
    pub async fn handle(&self, subscription: Subscription, data: &[u8]) -> Result<(), IngestError> {
        match subscription {
            Subscription::NewAd => {
                let ad: ScheduledCampaignAd = parse(data)?;
                info!(ad = %ad.campaign.id, "adding new campaign ad");
                self.campaigns.add_campaign(&ad).await?;
            }
            Subscription::Views => {
                let view: ViewMessage = parse(data)?;
                if !view.tags.is_empty() {
                    self.profiles
                        .set_tags(&view.user_id, &view.tags, Utc::now())
                        .await?;
                }
            }
            Subscription::ExperienceLevelSet => {
                let msg: ExperienceLevelMessage = parse(data)?;
                if msg.experience_level == ExperienceLevel::Unknown {
                    return Err(IngestError::Malformed(format!(
                        "unknown experience level for user {}",
                        msg.user_id
                    )));
                }
                self.profiles
                    .set_experience_level(&msg.user_id, msg.experience_level)
                    .await?;
            }
            Subscription::ExperienceLevelUnset => {
                let msg: UserMessage = parse(data)?;
                self.profiles.delete_experience_level(&msg.user_id).await?;
            }
            Subscription::SegmentFound => {
                let msg: SegmentMessage = parse(data)?;
                self.profiles.set_segment(&msg.user_id, &msg.segment).await?;
                info!(user_id = %msg.user_id, segment = %msg.segment, "updated user segment");
            }
            Subscription::DeleteOldTags => {
                self.profiles
                    .delete_old_tags(Utc::now() - self.tag_retention)
                    .await?;
            }
        }
        Ok(())
    }

    /// Decode a push envelope and apply it; the returned status acks or nacks.
    pub async fn push(&self, subscription: Subscription, body: &[u8]) -> StatusCode {
        let (message_id, result) = match decode_envelope(body) {
            Ok((id, data)) => {
                let result = self.handle(subscription, &data).await;
                (id, result)
            }
            Err(e) => (String::new(), Err(e)),
        };

        match result {
            Ok(()) => StatusCode::NO_CONTENT,
            Err(e) if e.is_transient() => {
                error!(%subscription, message_id = %message_id, error = %e, "failed to apply message, nacking");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Err(e) => {
                warn!(%subscription, message_id = %message_id, error = %e, "dropping message");
                StatusCode::NO_CONTENT
            }
        }
    }
}

fn decode_envelope(body: &[u8]) -> Result<(String, Vec<u8>), IngestError> {
    let envelope: PushEnvelope = parse(body)?;
    let data = STANDARD
        .decode(envelope.message.data.as_bytes())
        .map_err(|e| IngestError::Malformed(format!("bad base64: {e}")))?;
    Ok((envelope.message.message_id, data))
}

/// The push endpoint alone, for mounting next to the ad routes.
pub fn routes(ingestor: Arc<Ingestor>) -> Router {
    Router::new()
        .route("/{subscription}", post(receive))
        .with_state(ingestor)
}

/// Standalone ingestion app: the push endpoint plus `/health`.
pub fn router(ingestor: Arc<Ingestor>) -> Router {
    routes(ingestor).route("/health", get(crate::http::health))
}

async fn receive(
    State(ingestor): State<Arc<Ingestor>>,
    Path(subscription): Path<String>,
    body: Bytes,
) -> StatusCode {
    let Some(subscription) = Subscription::from_name(&subscription) else {
        return StatusCode::NOT_FOUND;
    };
    ingestor.push(subscription, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use adserve_core::{BreakerError, CampaignAd};
    use axum::body::Body;
    use axum::http::Request;
    use chrono::DateTime;
    use serde_json::json;
    use tower::ServiceExt;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        AddCampaign(String),
        SetTags(String, Vec<String>),
        DeleteOldTags(DateTime<Utc>),
        SetLevel(String, ExperienceLevel),
        DeleteLevel(String),
        SetSegment(String, String),
    }

    /// Records every write; fails them all when `fail` is set.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
        fail: Option<fn() -> StoreError>,
    }

    impl Recorder {
        fn record(&self, call: Call) -> Result<(), StoreError> {
            if let Some(fail) = self.fail {
                return Err(fail());
            }
            self.calls.lock().unwrap().push(call);
            Ok(())
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CampaignStore for Recorder {
        async fn fetch_active(
            &self,
            _now: DateTime<Utc>,
            _user_id: Option<&str>,
        ) -> Result<Vec<CampaignAd>, StoreError> {
            Ok(Vec::new())
        }
        async fn add_campaign(&self, c: &ScheduledCampaignAd) -> Result<(), StoreError> {
            self.record(Call::AddCampaign(c.campaign.id.clone()))
        }
    }

    #[async_trait::async_trait]
    impl UserProfileStore for Recorder {
        async fn get_tags(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn set_tags(
            &self,
            user_id: &str,
            tags: &[String],
            _now: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            self.record(Call::SetTags(user_id.into(), tags.to_vec()))
        }
        async fn delete_old_tags(&self, older_than: DateTime<Utc>) -> Result<usize, StoreError> {
            self.record(Call::DeleteOldTags(older_than)).map(|_| 0)
        }
        async fn get_experience_level(&self, _: &str) -> Result<ExperienceLevel, StoreError> {
            Ok(ExperienceLevel::Unknown)
        }
        async fn set_experience_level(
            &self,
            user_id: &str,
            level: ExperienceLevel,
        ) -> Result<(), StoreError> {
            self.record(Call::SetLevel(user_id.into(), level))
        }
        async fn delete_experience_level(&self, user_id: &str) -> Result<(), StoreError> {
            self.record(Call::DeleteLevel(user_id.into()))
        }
        async fn get_segment(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn set_segment(&self, user_id: &str, segment: &str) -> Result<(), StoreError> {
            self.record(Call::SetSegment(user_id.into(), segment.into()))
        }
    }

    fn ingestor(recorder: Arc<Recorder>) -> Ingestor {
        Ingestor::new(recorder.clone(), recorder)
    }

    fn envelope(payload: &serde_json::Value) -> Vec<u8> {
        let data = STANDARD.encode(serde_json::to_vec(payload).unwrap());
        serde_json::to_vec(&json!({
            "message": {"data": data, "messageId": "42"},
            "subscription": "projects/p/subscriptions/whatever"
        }))
        .unwrap()
    }

    fn new_ad_payload() -> serde_json::Value {
        json!({
            "id": "ad-1",
            "title": "Ship faster",
            "url": "https://example.com",
            "image": "https://img",
            "ratio": 2.0,
            "placeholder": "ph",
            "source": "Acme",
            "company": "Acme Inc",
            "probability": 0.3,
            "start": "2026-01-01T00:00:00Z",
            "end": "2026-02-01T00:00:00Z"
        })
    }

    #[test]
    fn subscription_names_resolve() {
        for s in Subscription::ALL {
            assert_eq!(Subscription::from_name(s.name()), Some(s));
        }
        assert_eq!(
            Subscription::from_name("projects/daily/subscriptions/monetization-views"),
            Some(Subscription::Views)
        );
        assert_eq!(Subscription::from_name("monetization-unknown"), None);
    }

    #[tokio::test]
    async fn new_ad_is_added() {
        let recorder = Arc::new(Recorder::default());
        let status = ingestor(recorder.clone())
            .push(Subscription::NewAd, &envelope(&new_ad_payload()))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(recorder.calls(), vec![Call::AddCampaign("ad-1".into())]);
    }

    #[tokio::test]
    async fn views_upsert_tags_and_skip_empty() {
        let recorder = Arc::new(Recorder::default());
        let ingestor = ingestor(recorder.clone());
        ingestor
            .push(
                Subscription::Views,
                &envelope(&json!({"userId": "u1", "tags": ["rust", "webdev"]})),
            )
            .await;
        ingestor
            .push(Subscription::Views, &envelope(&json!({"userId": "u1", "tags": []})))
            .await;
        assert_eq!(
            recorder.calls(),
            vec![Call::SetTags("u1".into(), vec!["rust".into(), "webdev".into()])]
        );
    }

    #[tokio::test]
    async fn experience_level_set_and_unset() {
        let recorder = Arc::new(Recorder::default());
        let ingestor = ingestor(recorder.clone());
        ingestor
            .push(
                Subscription::ExperienceLevelSet,
                &envelope(&json!({"userId": "u1", "experienceLevel": "MORE_THAN_4_YEARS"})),
            )
            .await;
        ingestor
            .push(Subscription::ExperienceLevelUnset, &envelope(&json!({"userId": "u1"})))
            .await;
        assert_eq!(
            recorder.calls(),
            vec![
                Call::SetLevel("u1".into(), ExperienceLevel::MoreThan4Years),
                Call::DeleteLevel("u1".into()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_experience_level_is_dropped() {
        let recorder = Arc::new(Recorder::default());
        let status = ingestor(recorder.clone())
            .push(
                Subscription::ExperienceLevelSet,
                &envelope(&json!({"userId": "u1", "experienceLevel": "WIZARD"})),
            )
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn segment_found_is_stored() {
        let recorder = Arc::new(Recorder::default());
        ingestor(recorder.clone())
            .push(
                Subscription::SegmentFound,
                &envelope(&json!({"userId": "u1", "segment": "devops"})),
            )
            .await;
        assert_eq!(
            recorder.calls(),
            vec![Call::SetSegment("u1".into(), "devops".into())]
        );
    }

    #[tokio::test]
    async fn delete_old_tags_uses_retention() {
        let recorder = Arc::new(Recorder::default());
        let before = Utc::now() - Duration::days(TAG_RETENTION_DAYS);
        let status = ingestor(recorder.clone())
            .push(Subscription::DeleteOldTags, &envelope(&json!(null)))
            .await;
        let after = Utc::now() - Duration::days(TAG_RETENTION_DAYS);
        assert_eq!(status, StatusCode::NO_CONTENT);
        match recorder.calls().as_slice() {
            [Call::DeleteOldTags(cutoff)] => assert!(before <= *cutoff && *cutoff <= after),
            other => panic!("unexpected calls {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_payloads_are_acked() {
        let recorder = Arc::new(Recorder::default());
        let ingestor = ingestor(recorder.clone());

        assert_eq!(
            ingestor.push(Subscription::Views, b"not json").await,
            StatusCode::NO_CONTENT
        );
        let bad_base64 = serde_json::to_vec(&json!({"message": {"data": "%%%"}})).unwrap();
        assert_eq!(
            ingestor.push(Subscription::Views, &bad_base64).await,
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            ingestor
                .push(Subscription::NewAd, &envelope(&json!({"id": 3})))
                .await,
            StatusCode::NO_CONTENT
        );
        assert!(recorder.calls().is_empty());
    }

    #[tokio::test]
    async fn duplicate_campaign_is_acked() {
        let recorder = Arc::new(Recorder {
            fail: Some(|| StoreError::Duplicate("ad-1".into())),
            ..Default::default()
        });
        let status = ingestor(recorder)
            .push(Subscription::NewAd, &envelope(&new_ad_payload()))
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn transient_store_failure_is_nacked() {
        let recorder = Arc::new(Recorder {
            fail: Some(|| BreakerError::Open("db".into()).into()),
            ..Default::default()
        });
        let status = ingestor(recorder)
            .push(
                Subscription::SegmentFound,
                &envelope(&json!({"userId": "u1", "segment": "devops"})),
            )
            .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn router_dispatches_by_subscription() {
        let recorder = Arc::new(Recorder::default());
        let app = router(Arc::new(ingestor(recorder.clone())));

        let request = Request::builder()
            .method("POST")
            .uri("/monetization-segment-found")
            .header("content-type", "application/json")
            .body(Body::from(envelope(&json!({"userId": "u1", "segment": "backend"}))))
            .unwrap();
        let resp = app.clone().oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(
            recorder.calls(),
            vec![Call::SetSegment("u1".into(), "backend".into())]
        );

        let request = Request::builder()
            .method("POST")
            .uri("/monetization-unknown")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(request).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
