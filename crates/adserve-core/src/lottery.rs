//! Campaign lottery: single-pass, probability-weighted pick over active campaigns.
//!
//! Each campaign's `probability` is its share of the draw, not a normalised
//! weight. The draw walks campaigns in stored order keeping a running
//! remainder:
//!
//! ```text
//! prob = uniform [0, 1)
//! for each eligible campaign:
//!     if prob <= campaign.probability: pick it
//!     prob -= campaign.probability
//! ```
//!
//! When a group's probabilities sum past 1 the later rows are only reached by
//! draws the earlier rows did not take, so storage order is the tie-break.
//! When they sum below 1 the draw may fall through with no pick.
//!
//! # Geo eligibility
//!
//! `geo` is a free-text, comma-joined list of countries. An empty list is
//! unrestricted. The containment test runs in opposite directions for the two
//! pools and both are substring tests:
//!
//! - primary campaigns: the geo list contains the viewer's country
//! - fallback campaigns: the viewer's country contains the geo list

use crate::model::CampaignAd;

/// Which group of campaigns a draw runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    /// Campaigns with `fallback == false`, drawn before any provider.
    Primary,
    /// Campaigns with `fallback == true`, drawn after every provider.
    Fallback,
}

impl Pool {
    fn admits(self, campaign: &CampaignAd) -> bool {
        match self {
            Self::Primary => !campaign.fallback,
            Self::Fallback => campaign.fallback,
        }
    }
}

/// Whether a campaign's geo list lets `country` see it in the given pool.
pub fn geo_matches(pool: Pool, geo: &str, country: &str) -> bool {
    if geo.is_empty() {
        return true;
    }
    match pool {
        Pool::Primary => geo.contains(country),
        Pool::Fallback => country.contains(geo),
    }
}

/// Run one lottery over `campaigns` with the uniform draw `prob`.
pub fn draw<'a>(
    campaigns: &'a [CampaignAd],
    pool: Pool,
    country: &str,
    mut prob: f32,
) -> Option<&'a CampaignAd> {
    for campaign in campaigns {
        if !pool.admits(campaign) || !geo_matches(pool, &campaign.geo, country) {
            continue;
        }
        if prob <= campaign.probability {
            return Some(campaign);
        }
        prob -= campaign.probability;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camp(id: &str, probability: f32, fallback: bool, geo: &str) -> CampaignAd {
        CampaignAd {
            id: id.into(),
            probability,
            fallback,
            geo: geo.into(),
            ..Default::default()
        }
    }

    fn picked(campaigns: &[CampaignAd], pool: Pool, country: &str, prob: f32) -> Option<String> {
        draw(campaigns, pool, country, prob).map(|c| c.id.clone())
    }

    #[test]
    fn certain_campaign_always_wins() {
        let campaigns = vec![camp("a", 1.0, false, "")];
        for prob in [0.0, 0.25, 0.5, 0.999] {
            assert_eq!(picked(&campaigns, Pool::Primary, "", prob).as_deref(), Some("a"));
        }
    }

    #[test]
    fn running_remainder_reaches_later_rows() {
        let campaigns = vec![camp("a", 0.3, false, ""), camp("b", 0.3, false, "")];
        assert_eq!(picked(&campaigns, Pool::Primary, "", 0.2).as_deref(), Some("a"));
        // 0.5 - 0.3 = 0.2 <= 0.3
        assert_eq!(picked(&campaigns, Pool::Primary, "", 0.5).as_deref(), Some("b"));
        // 0.7 - 0.3 - 0.3 = 0.1 left over, nothing picked
        assert_eq!(picked(&campaigns, Pool::Primary, "", 0.7), None);
    }

    #[test]
    fn over_sum_favours_storage_order() {
        let campaigns = vec![camp("a", 1.0, false, ""), camp("b", 1.0, false, "")];
        for prob in [0.0, 0.5, 0.99] {
            assert_eq!(picked(&campaigns, Pool::Primary, "", prob).as_deref(), Some("a"));
        }
    }

    #[test]
    fn pools_do_not_mix() {
        let campaigns = vec![camp("fb", 1.0, true, ""), camp("primary", 1.0, false, "")];
        assert_eq!(
            picked(&campaigns, Pool::Primary, "", 0.5).as_deref(),
            Some("primary")
        );
        assert_eq!(picked(&campaigns, Pool::Fallback, "", 0.5).as_deref(), Some("fb"));
    }

    #[test]
    fn ineligible_rows_do_not_consume_the_draw() {
        let campaigns = vec![
            camp("elsewhere", 0.5, false, "canada"),
            camp("here", 0.5, false, ""),
        ];
        // Skipped rows leave the remainder untouched.
        assert_eq!(
            picked(&campaigns, Pool::Primary, "germany", 0.45).as_deref(),
            Some("here")
        );
        assert_eq!(picked(&campaigns, Pool::Primary, "germany", 0.6), None);
    }

    #[test]
    fn primary_geo_list_contains_country() {
        let geo = "united states,israel,germany";
        assert!(geo_matches(Pool::Primary, geo, "united states"));
        assert!(geo_matches(Pool::Primary, geo, "israel"));
        assert!(!geo_matches(Pool::Primary, geo, "canada"));
        assert!(geo_matches(Pool::Primary, "", "canada"));
    }

    #[test]
    fn primary_geo_is_substring_permissive() {
        // "states" is not a country, but it is a substring of the list.
        assert!(geo_matches(Pool::Primary, "united states", "states"));
        // An unresolved country is the empty string, which every list contains.
        assert!(geo_matches(Pool::Primary, "united states", ""));
    }

    #[test]
    fn fallback_country_contains_geo() {
        assert!(geo_matches(Pool::Fallback, "states", "united states"));
        assert!(geo_matches(Pool::Fallback, "united states", "united states"));
        // A multi-country list is never contained in a single country name.
        assert!(!geo_matches(
            Pool::Fallback,
            "united states,israel",
            "united states"
        ));
        assert!(!geo_matches(Pool::Fallback, "united states", ""));
        assert!(geo_matches(Pool::Fallback, "", ""));
    }

    #[test]
    fn primary_lottery_filters_by_geo() {
        let campaigns = vec![camp("us", 1.0, false, "united states,israel,germany")];
        assert_eq!(
            picked(&campaigns, Pool::Primary, "united states", 0.3).as_deref(),
            Some("us")
        );
        assert_eq!(picked(&campaigns, Pool::Primary, "canada", 0.3), None);
    }

    #[test]
    fn empty_campaign_list() {
        assert_eq!(picked(&[], Pool::Primary, "", 0.0), None);
        assert_eq!(picked(&[], Pool::Fallback, "", 0.0), None);
    }
}
