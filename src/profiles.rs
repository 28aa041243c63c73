//! Investor risk profiles.
//!
//! A profile is plain data: how many assets to take from each cluster, the
//! scoring weights, and whether low or high beta is preferred. The five
//! canonical profiles are rows of [`RiskProfile::canonical`]; adding a
//! profile means adding a row.

use crate::types::{ClusterLabel, OUTLIER_LABEL};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Weights of the composite score terms.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    #[serde(rename = "return")]
    pub ret: f64,
    pub momentum: f64,
    pub sharpe: f64,
    pub beta: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            ret: 0.35,
            momentum: 0.30,
            sharpe: 0.15,
            beta: 0.20,
        }
    }
}

impl ScoringWeights {
    pub fn is_valid(&self) -> bool {
        [self.ret, self.momentum, self.sharpe, self.beta]
            .iter()
            .all(|w| w.is_finite() && *w >= 0.0)
    }
}

/// Direction of the beta term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetaPreference {
    /// Normalized beta is inverted, so low-beta assets score higher.
    Low,
    High,
}

/// Number of assets to draw from one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterTarget {
    pub cluster: ClusterLabel,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub name: String,
    pub distribution: Vec<ClusterTarget>,
    /// Falls back to the `[scoring]` weights when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<ScoringWeights>,
    pub beta_preference: BetaPreference,
}

impl RiskProfile {
    pub fn new(
        name: impl Into<String>,
        distribution: &[(ClusterLabel, usize)],
        beta_preference: BetaPreference,
    ) -> Self {
        Self {
            name: name.into(),
            distribution: distribution
                .iter()
                .map(|&(cluster, count)| ClusterTarget { cluster, count })
                .collect(),
            weights: None,
            beta_preference,
        }
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = Some(weights);
        self
    }

    /// Target counts keyed by cluster label, summing duplicated entries.
    pub fn targets(&self) -> BTreeMap<ClusterLabel, usize> {
        let mut targets = BTreeMap::new();
        for t in &self.distribution {
            *targets.entry(t.cluster).or_insert(0) += t.count;
        }
        targets
    }

    pub fn total_assets(&self) -> usize {
        self.distribution.iter().map(|t| t.count).sum()
    }

    pub fn includes_outliers(&self) -> bool {
        self.distribution
            .iter()
            .any(|t| t.cluster == OUTLIER_LABEL && t.count > 0)
    }

    /// The five default profiles, from most to least defensive.
    pub fn canonical() -> Vec<RiskProfile> {
        use BetaPreference::{High, Low};
        vec![
            RiskProfile::new("Conservative", &[(0, 4), (1, 3), (2, 3)], Low),
            RiskProfile::new("Moderate", &[(0, 3), (1, 3), (2, 2), (3, 2)], Low),
            RiskProfile::new(
                "Balanced",
                &[(0, 2), (1, 2), (2, 2), (3, 2), (OUTLIER_LABEL, 2)],
                Low,
            ),
            RiskProfile::new("Aggressive", &[(1, 2), (2, 3), (3, 3), (OUTLIER_LABEL, 2)], High),
            RiskProfile::new("Speculative", &[(2, 3), (3, 3), (OUTLIER_LABEL, 4)], High),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_profiles() {
        let profiles = RiskProfile::canonical();
        assert_eq!(profiles.len(), 5);
        assert!(profiles.iter().all(|p| p.total_assets() == 10));
        assert!(!profiles[0].includes_outliers());
        assert!(profiles[4].includes_outliers());
        assert_eq!(profiles[3].beta_preference, BetaPreference::High);
    }

    #[test]
    fn test_targets_merge_duplicates() {
        let p = RiskProfile::new("Dup", &[(0, 2), (1, 1), (0, 3)], BetaPreference::Low);
        let targets = p.targets();
        assert_eq!(targets[&0], 5);
        assert_eq!(targets[&1], 1);
    }

    #[test]
    fn test_profile_toml_round_trip() {
        let profile = RiskProfile::canonical().remove(2);
        let text = toml::to_string(&profile).unwrap();
        let back: RiskProfile = toml::from_str(&text).unwrap();
        assert_eq!(profile, back);
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoringWeights::default();
        assert!((w.ret + w.momentum + w.sharpe + w.beta - 1.0).abs() < 1e-12);
        assert!(w.is_valid());
    }
}
