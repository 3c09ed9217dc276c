//! Keyword clusters that turn a viewer's tags into a coarse segment label.

use serde::{Deserialize, Serialize};

/// One segment and the tags that place a viewer in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentCluster {
    pub segment: String,
    pub keywords: Vec<String>,
}

impl SegmentCluster {
    pub fn new(segment: &str, keywords: &[&str]) -> Self {
        Self {
            segment: segment.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    fn contains(&self, tag: &str) -> bool {
        self.keywords.iter().any(|k| k.eq_ignore_ascii_case(tag))
    }
}

/// Ordered segment clusters.
///
/// Tags are scanned most recent first; the first tag that belongs to any
/// cluster decides the segment. Clusters are checked in declaration order, so
/// a keyword listed in two clusters resolves to the earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentRules {
    clusters: Vec<SegmentCluster>,
}

impl SegmentRules {
    pub fn new(clusters: Vec<SegmentCluster>) -> Self {
        Self { clusters }
    }

    pub fn clusters(&self) -> &[SegmentCluster] {
        &self.clusters
    }

    /// Segment for a tag list ordered most recent first.
    pub fn derive(&self, tags: &[String]) -> Option<&str> {
        tags.iter().find_map(|tag| {
            self.clusters
                .iter()
                .find(|c| c.contains(tag))
                .map(|c| c.segment.as_str())
        })
    }
}

impl Default for SegmentRules {
    fn default() -> Self {
        Self::new(vec![
            SegmentCluster::new(
                "crypto",
                &["crypto", "blockchain", "bitcoin", "ethereum", "web3", "solidity"],
            ),
            SegmentCluster::new("kubernetes", &["kubernetes", "k8s", "helm"]),
            SegmentCluster::new(
                "devops",
                &["devops", "docker", "aws", "gcp", "azure", "terraform", "linux", "cloud"],
            ),
            SegmentCluster::new(
                "frontend",
                &[
                    "frontend", "webdev", "javascript", "typescript", "react", "vue", "angular",
                    "svelte", "css", "html",
                ],
            ),
            SegmentCluster::new(
                "backend",
                &[
                    "backend", "nodejs", "golang", "java", "python", "php", "ruby", "rust",
                    "databases", "sql",
                ],
            ),
        ])
    }
}
