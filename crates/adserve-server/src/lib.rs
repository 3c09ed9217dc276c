//! HTTP surface of adserve: the ad selection chain behind `/a`, IP geolocation,
//! and the push endpoints that feed the stores.

use std::sync::Arc;

use axum::Router;

pub mod geo;
pub mod http;
pub mod ingest;
pub mod selector;

pub use geo::{GeoError, GeoResolver, MaxMindResolver, NoGeo};
pub use ingest::{IngestError, Ingestor, Subscription};
pub use selector::{AdRequest, AdSelector};

/// The serving app: ad routes and push ingestion on one router, so a single
/// process owns the stores that both read and write.
pub fn app(selector: Arc<AdSelector>, ingestor: Arc<Ingestor>) -> Router {
    http::router(selector).merge(ingest::routes(ingestor))
}
