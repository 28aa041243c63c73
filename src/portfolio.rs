//! Portfolios and cap-aware weighting.

use crate::error::{PipelineError, Result};
use crate::types::{AssetId, ClusterLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Tolerance on the weight sum.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

const CAP_EPSILON: f64 = 1e-12;

/// Diversification caps applied to every portfolio.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioConstraints {
    pub max_weight_per_asset: f64,
    pub max_weight_per_cluster: f64,
}

impl Default for PortfolioConstraints {
    fn default() -> Self {
        Self {
            max_weight_per_asset: 0.20,
            max_weight_per_cluster: 0.40,
        }
    }
}

impl PortfolioConstraints {
    /// Check a set of weights against the caps.
    pub fn validate_weights(&self, holdings: &[Holding]) -> Result<()> {
        let total: f64 = holdings.iter().map(|h| h.weight).sum();
        if (total - 1.0).abs() > WEIGHT_TOLERANCE {
            return Err(PipelineError::ConstraintViolation(format!(
                "weights sum to {:.8}, expected 1.0",
                total
            )));
        }

        for h in holdings {
            if h.weight < 0.0 || h.weight > self.max_weight_per_asset + WEIGHT_TOLERANCE {
                return Err(PipelineError::ConstraintViolation(format!(
                    "asset {} weight {:.4} exceeds cap {:.4}",
                    h.asset_id, h.weight, self.max_weight_per_asset
                )));
            }
        }

        for (cluster, weight) in cluster_weights(holdings) {
            if weight > self.max_weight_per_cluster + WEIGHT_TOLERANCE {
                return Err(PipelineError::ConstraintViolation(format!(
                    "cluster {} weight {:.4} exceeds cap {:.4}",
                    cluster, weight, self.max_weight_per_cluster
                )));
            }
        }

        Ok(())
    }
}

/// One position of a portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub asset_id: AssetId,
    pub cluster_label: ClusterLabel,
    pub score: f64,
    pub weight: f64,
}

/// A cluster that supplied fewer candidates than its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shortfall {
    pub cluster: ClusterLabel,
    pub target: usize,
    pub available: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    pub profile: String,
    pub holdings: Vec<Holding>,
    /// Non-empty only when shortfalls are allowed.
    #[serde(default)]
    pub shortfalls: Vec<Shortfall>,
}

impl Portfolio {
    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    pub fn asset_ids(&self) -> Vec<&str> {
        self.holdings.iter().map(|h| h.asset_id.as_str()).collect()
    }

    pub fn weight_of(&self, asset_id: &str) -> Option<f64> {
        self.holdings
            .iter()
            .find(|h| h.asset_id == asset_id)
            .map(|h| h.weight)
    }

    pub fn total_weight(&self) -> f64 {
        self.holdings.iter().map(|h| h.weight).sum()
    }

    pub fn cluster_weights(&self) -> BTreeMap<ClusterLabel, f64> {
        cluster_weights(&self.holdings)
    }
}

fn cluster_weights(holdings: &[Holding]) -> BTreeMap<ClusterLabel, f64> {
    let mut weights = BTreeMap::new();
    for h in holdings {
        *weights.entry(h.cluster_label).or_insert(0.0) += h.weight;
    }
    weights
}

/// Equal weights with asset and cluster caps.
///
/// Starts from `1/N`. Assets above the asset cap are clamped, clusters above
/// the cluster cap are scaled down to it, and the removed weight is spread
/// over the remaining unconstrained assets in proportion to their weight.
/// This repeats until no cap is exceeded.
pub fn capped_equal_weights(
    clusters: &[ClusterLabel],
    constraints: &PortfolioConstraints,
) -> Result<Vec<f64>> {
    let n = clusters.len();
    if n == 0 {
        return Err(PipelineError::ConstraintViolation(
            "no assets to weight".to_string(),
        ));
    }
    let asset_cap = constraints.max_weight_per_asset;
    let cluster_cap = constraints.max_weight_per_cluster;

    let mut members: BTreeMap<ClusterLabel, Vec<usize>> = BTreeMap::new();
    for (i, c) in clusters.iter().enumerate() {
        members.entry(*c).or_default().push(i);
    }

    let capacity: f64 = members
        .values()
        .map(|idx| cluster_cap.min(idx.len() as f64 * asset_cap))
        .sum();
    if capacity < 1.0 - WEIGHT_TOLERANCE {
        let (cluster, idx) = members
            .iter()
            .max_by(|a, b| a.1.len().cmp(&b.1.len()).then(b.0.cmp(a.0)))
            .map(|(c, idx)| (*c, idx.len()))
            .unwrap_or((0, 0));
        return Err(PipelineError::ConstraintViolation(format!(
            "caps allow at most {:.4} total weight; cluster {} ({} assets) is limited to {:.4}",
            capacity,
            cluster,
            idx,
            cluster_cap.min(idx as f64 * asset_cap)
        )));
    }

    let mut weights = vec![1.0 / n as f64; n];
    let mut fixed = vec![false; n];

    for round in 0..=(n + members.len()) {
        let mut excess = 0.0;

        for i in 0..n {
            if weights[i] > asset_cap + CAP_EPSILON {
                excess += weights[i] - asset_cap;
                weights[i] = asset_cap;
                fixed[i] = true;
            }
        }

        for (cluster, idx) in &members {
            let total: f64 = idx.iter().map(|&i| weights[i]).sum();
            if total > cluster_cap + CAP_EPSILON {
                let scale = cluster_cap / total;
                for &i in idx {
                    excess += weights[i] * (1.0 - scale);
                    weights[i] *= scale;
                    fixed[i] = true;
                }
                debug!("cluster {} capped at {:.4} (was {:.4})", cluster, cluster_cap, total);
            }
        }

        if excess <= CAP_EPSILON {
            return Ok(weights);
        }

        let free: Vec<usize> = (0..n).filter(|&i| !fixed[i]).collect();
        if free.is_empty() {
            return Err(PipelineError::ConstraintViolation(format!(
                "no uncapped assets left to absorb {:.4} excess weight",
                excess
            )));
        }
        let base: f64 = free.iter().map(|&i| weights[i]).sum();
        for &i in &free {
            weights[i] += if base > 0.0 {
                excess * weights[i] / base
            } else {
                excess / free.len() as f64
            };
        }
        debug!("redistribution round {}: moved {:.6}", round, excess);
    }

    Err(PipelineError::ConstraintViolation(
        "weight redistribution did not converge".to_string(),
    ))
}
