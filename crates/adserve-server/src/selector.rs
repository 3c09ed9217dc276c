//! The ad selection chain.
//!
//! One page view yields at most one ad. Sources are tried in a fixed order
//! and the first one that produces an ad wins:
//!
//! 1. primary campaign lottery
//! 2. premium self-serve marketplace placement
//! 3. routed marketplace placement (segment or geo)
//! 4. keyword network
//! 5. standard self-serve marketplace placement
//! 6. fallback campaign lottery
//!
//! Steps 3 and 4 swap with probability `secondary_first_ratio`. A failing
//! source is logged and skipped; nothing here returns an error.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use adserve_core::{CampaignAd, Placements, Pool, ProviderAd, SegmentRules, ServedAd, Viewer, draw};
use adserve_providers::{KeywordProvider, PlacementProvider, ProviderRequest};
use adserve_store::{CampaignStore, UserProfileStore};

use crate::geo::GeoResolver;

/// One inbound page view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdRequest {
    pub ip: String,
    pub user_agent: String,
    pub user_id: Option<String>,
    /// The viewer is on the `active` surface; routes to the active placement.
    pub active: bool,
}

impl AdRequest {
    fn provider_request(&self) -> ProviderRequest {
        ProviderRequest {
            ip: self.ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

pub struct AdSelector {
    campaigns: Arc<dyn CampaignStore>,
    profiles: Arc<dyn UserProfileStore>,
    marketplace: Arc<dyn PlacementProvider>,
    keywords: Arc<dyn KeywordProvider>,
    geo: Arc<dyn GeoResolver>,
    placements: Placements,
    segments: SegmentRules,
    secondary_first_ratio: f32,
}

impl AdSelector {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        profiles: Arc<dyn UserProfileStore>,
        marketplace: Arc<dyn PlacementProvider>,
        keywords: Arc<dyn KeywordProvider>,
        geo: Arc<dyn GeoResolver>,
    ) -> Self {
        Self {
            campaigns,
            profiles,
            marketplace,
            keywords,
            geo,
            placements: Placements::default(),
            segments: SegmentRules::default(),
            secondary_first_ratio: 0.0,
        }
    }

    pub fn with_placements(mut self, placements: Placements) -> Self {
        self.placements = placements;
        self
    }

    pub fn with_segments(mut self, segments: SegmentRules) -> Self {
        self.segments = segments;
        self
    }

    /// Probability of asking the keyword network before the routed placement.
    pub fn with_secondary_first_ratio(mut self, ratio: f32) -> Self {
        self.secondary_first_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn placements(&self) -> &Placements {
        &self.placements
    }

    /// Run the chain for one page view.
    pub async fn select<R: Rng + Send>(&self, request: &AdRequest, rng: &mut R) -> Option<ServedAd> {
        let viewer = self.viewer(request).await;
        let campaigns = self.active_campaigns(request.user_id.as_deref()).await;
        let provider_request = request.provider_request();

        if let Some(c) = draw(&campaigns, Pool::Primary, &viewer.country, rng.r#gen()) {
            debug!(ad = %c.id, "primary campaign won");
            return Some(c.clone().into());
        }

        if let Some(ad) = self
            .placement_ad(&provider_request, &self.placements.premium, "premium")
            .await
        {
            return Some(with_provider_id(ad, "premium").into());
        }

        let routed = self
            .placements
            .route(request.active, &viewer.country, viewer.segment.as_deref());
        let keywords_first = rng.r#gen::<f32>() < self.secondary_first_ratio;
        let secondary = if keywords_first {
            match self.keyword_ad(&provider_request, &viewer.tags).await {
                Some(ad) => Some(ad),
                None => self.placement_ad(&provider_request, routed, "routed").await,
            }
        } else {
            match self.placement_ad(&provider_request, routed, "routed").await {
                Some(ad) => Some(ad),
                None => self.keyword_ad(&provider_request, &viewer.tags).await,
            }
        };
        if let Some(ad) = secondary {
            return Some(ad.into());
        }

        if let Some(ad) = self
            .placement_ad(&provider_request, &self.placements.standard, "standard")
            .await
        {
            return Some(with_provider_id(ad, "standard").into());
        }

        if let Some(c) = draw(&campaigns, Pool::Fallback, &viewer.country, rng.r#gen()) {
            debug!(ad = %c.id, "fallback campaign won");
            return Some(c.clone().into());
        }

        info!(country = %viewer.country, "no ads to serve");
        None
    }

    /// The toilet placement alone.
    pub async fn toilet(&self, request: &AdRequest) -> Option<ServedAd> {
        let ad = self
            .placement_ad(&request.provider_request(), &self.placements.toilet, "toilet")
            .await;
        if ad.is_none() {
            info!("no ads to serve for toilet");
        }
        ad.map(Into::into)
    }

    /// The marketplace's raw ad objects for the toilet placement. Empty on failure.
    pub async fn toilet_raw(&self, request: &AdRequest) -> Vec<Map<String, Value>> {
        match self
            .marketplace
            .raw_ads(&request.provider_request(), &self.placements.toilet)
            .await
        {
            Ok(ads) => ads,
            Err(e) => {
                warn!(error = %e, "failed to fetch raw marketplace ads");
                Vec::new()
            }
        }
    }

    async fn viewer(&self, request: &AdRequest) -> Viewer {
        let country = self.geo.lookup(&request.ip).unwrap_or_default();
        let Some(user_id) = request.user_id.as_deref() else {
            return Viewer {
                country,
                ..Default::default()
            };
        };

        let tags = self.profiles.get_tags(user_id).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "failed to read user tags");
            Vec::new()
        });
        let stored = self.profiles.get_segment(user_id).await.unwrap_or_else(|e| {
            warn!(user_id, error = %e, "failed to read user segment");
            None
        });
        let segment = stored.or_else(|| self.segments.derive(&tags).map(str::to_string));

        Viewer {
            user_id: Some(user_id.to_string()),
            country,
            tags,
            segment,
        }
    }

    async fn active_campaigns(&self, user_id: Option<&str>) -> Vec<CampaignAd> {
        self.campaigns
            .fetch_active(Utc::now(), user_id)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "failed to fetch campaigns");
                Vec::new()
            })
    }

    async fn placement_ad(
        &self,
        request: &ProviderRequest,
        placement: &str,
        stage: &str,
    ) -> Option<ProviderAd> {
        match self.marketplace.fetch(request, placement).await {
            Ok(ad) => ad,
            Err(e) => {
                warn!(stage, placement, error = %e, "failed to fetch marketplace ad");
                None
            }
        }
    }

    async fn keyword_ad(&self, request: &ProviderRequest, tags: &[String]) -> Option<ProviderAd> {
        match self.keywords.fetch(request, tags).await {
            Ok(ad) => ad,
            Err(e) => {
                warn!(error = %e, "failed to fetch keyword network ad");
                None
            }
        }
    }
}

fn with_provider_id(mut ad: ProviderAd, provider_id: &str) -> ProviderAd {
    ad.ad.provider_id = provider_id.to_string();
    ad
}
