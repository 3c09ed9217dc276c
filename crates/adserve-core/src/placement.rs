//! Placement keys for the brokered marketplace and the segment-or-geo rule.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Placement keys used across the selection chain.
///
/// Deserialises from a partial JSON object; missing keys keep their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Placements {
    /// Premium self-serve, tried right after the primary campaign lottery.
    pub premium: String,
    /// Standard self-serve, tried right before the fallback lottery.
    pub standard: String,
    /// Routed placement for requests flagged `active=true`.
    pub active: String,
    /// The single placement served on `/a/toilet`.
    pub toilet: String,
    /// Routed placement per lower-cased country name.
    pub by_country: BTreeMap<String, String>,
    /// Routed placement per viewer segment.
    pub by_segment: BTreeMap<String, String>,
    /// Routed placement when nothing else matches.
    pub default: String,
}

impl Placements {
    /// The segment-or-geo rule: `active` flag, then country, then segment.
    pub fn route(&self, active: bool, country: &str, segment: Option<&str>) -> &str {
        if active {
            return &self.active;
        }
        if let Some(key) = self.by_country.get(country) {
            return key;
        }
        segment
            .and_then(|s| self.by_segment.get(s))
            .unwrap_or(&self.default)
    }
}

impl Default for Placements {
    fn default() -> Self {
        let by_country = [("united states", "CE7D5KJL"), ("united kingdom", "CEAD62QI")];
        let by_segment = [
            ("frontend", "CE7I5K3Y"),
            ("backend", "CE7I5K37"),
            ("devops", "CE7I5KQE"),
            ("kubernetes", "CE7I5KQE"),
            ("crypto", "CK7DT2QM"),
        ];
        Self {
            premium: "CEBI62JM".into(),
            standard: "CEBI62J7".into(),
            active: "CEAIP23E".into(),
            toilet: "CK7DT2QM".into(),
            by_country: by_country
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            by_segment: by_segment
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            default: "CK7DT2QM".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_flag_overrides_everything() {
        let p = Placements::default();
        assert_eq!(p.route(true, "united states", Some("frontend")), "CEAIP23E");
    }

    #[test]
    fn country_beats_segment() {
        let p = Placements::default();
        assert_eq!(p.route(false, "united states", Some("frontend")), "CE7D5KJL");
        assert_eq!(p.route(false, "united kingdom", None), "CEAD62QI");
    }

    #[test]
    fn segment_then_default() {
        let p = Placements::default();
        assert_eq!(p.route(false, "israel", Some("backend")), "CE7I5K37");
        assert_eq!(p.route(false, "israel", Some("gardening")), "CK7DT2QM");
        assert_eq!(p.route(false, "", None), "CK7DT2QM");
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let p: Placements =
            serde_json::from_str(r#"{"premium": "P1", "bySegment": {"python": "PY"}}"#).unwrap();
        assert_eq!(p.premium, "P1");
        assert_eq!(p.standard, "CEBI62J7");
        assert_eq!(p.route(false, "israel", Some("python")), "PY");
        assert_eq!(p.route(false, "israel", Some("frontend")), "CK7DT2QM");
    }
}
