//! Ad-serving routes.
//!
//! - `GET /a`, `/a/`, `/v1/a`: the selection chain, a JSON array of zero or one ad
//! - `GET /a/toilet`: the toilet placement only
//! - `GET /a/{any}`: the marketplace's raw ads for the toilet placement
//! - `GET /health`: `OK`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, FromRequestParts, Query, State};
use axum::http::request::Parts;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use axum_extra::extract::CookieJar;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::selector::{AdRequest, AdSelector};

/// Cookie carrying the viewer's user id.
pub const USER_COOKIE: &str = "da2";

pub fn router(selector: Arc<AdSelector>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/a", get(serve_ad))
        .route("/a/", get(serve_ad))
        .route("/v1/a", get(serve_ad))
        .route("/v1/a/", get(serve_ad))
        .route("/a/toilet", get(serve_toilet))
        .route("/a/{placement}", get(serve_raw))
        .with_state(selector)
}

pub(crate) async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize, Default)]
struct AdQuery {
    #[serde(default)]
    active: Option<String>,
}

impl<S: Send + Sync> FromRequestParts<S> for AdRequest {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip = parts
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_default();
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let user_id = CookieJar::from_headers(&parts.headers)
            .get(USER_COOKIE)
            .map(|c| c.value().to_string())
            .filter(|v| !v.is_empty());
        let active = Query::<AdQuery>::try_from_uri(&parts.uri)
            .map(|Query(q)| q)
            .unwrap_or_default()
            .active
            .is_some_and(|v| v == "true");

        Ok(AdRequest {
            ip,
            user_agent,
            user_id,
            active,
        })
    }
}

async fn serve_ad(State(selector): State<Arc<AdSelector>>, request: AdRequest) -> Response {
    let mut rng = StdRng::from_entropy();
    let ad = selector.select(&request, &mut rng).await;
    json_array(ad.as_slice())
}

async fn serve_toilet(State(selector): State<Arc<AdSelector>>, request: AdRequest) -> Response {
    let ad = selector.toilet(&request).await;
    json_array(ad.as_slice())
}

async fn serve_raw(State(selector): State<Arc<AdSelector>>, request: AdRequest) -> Response {
    let ads = selector.toilet_raw(&request).await;
    json_array(&ads)
}

fn json_array<T: Serialize>(items: &[T]) -> Response {
    match serde_json::to_vec(items) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            (StatusCode::INTERNAL_SERVER_ERROR, "Server Internal Error").into_response()
        }
    }
}
