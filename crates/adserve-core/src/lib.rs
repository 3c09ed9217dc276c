pub mod breaker;
pub mod lottery;
pub mod model;
pub mod placement;
pub mod segment;

pub use breaker::{Breaker, BreakerConfig, BreakerError, BreakerState};
pub use lottery::{Pool, draw, geo_matches};
pub use model::{
    Ad, CampaignAd, ExperienceLevel, ProviderAd, ScheduledCampaignAd, ServedAd, Viewer,
};
pub use placement::Placements;
pub use segment::{SegmentCluster, SegmentRules};
