//! Composite scoring and per-profile asset selection.
//!
//! Each asset is scored against the other members of its own cluster:
//!
//! ```text
//! score = w_r * return_norm + w_m * momentum_norm + w_s * sharpe_norm + w_b * beta_adj
//! ```
//!
//! where every `_norm` term is min-max scaled within the cluster, and
//! `beta_adj` is the normalized beta, inverted for low-beta profiles. The
//! selector then takes the top-ranked assets of each cluster named by a
//! [`RiskProfile`] and weights them with [`capped_equal_weights`].

use crate::clustering::ClusterAssignment;
use crate::error::{PipelineError, Result};
use crate::features::{FeatureMatrix, Metric};
use crate::portfolio::{capped_equal_weights, Holding, Portfolio, PortfolioConstraints, Shortfall};
use crate::profiles::{BetaPreference, RiskProfile, ScoringWeights};
use crate::stats;
use crate::types::{AssetId, ClusterLabel, OUTLIER_LABEL};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

/// Scoring and portfolio construction settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionConfig {
    #[serde(default)]
    pub weights: ScoringWeights,
    /// Outlier-segment assets need an annualized return above this.
    #[serde(default)]
    pub outlier_min_return: f64,
    #[serde(default = "default_max_weight_per_asset")]
    pub max_weight_per_asset: f64,
    #[serde(default = "default_max_weight_per_cluster")]
    pub max_weight_per_cluster: f64,
    #[serde(default = "default_min_assets")]
    pub min_assets: usize,
    /// Record short clusters on the portfolio instead of failing.
    #[serde(default)]
    pub allow_shortfall: bool,
}

fn default_max_weight_per_asset() -> f64 {
    0.20
}
fn default_max_weight_per_cluster() -> f64 {
    0.40
}
fn default_min_assets() -> usize {
    5
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            outlier_min_return: 0.0,
            max_weight_per_asset: default_max_weight_per_asset(),
            max_weight_per_cluster: default_max_weight_per_cluster(),
            min_assets: default_min_assets(),
            allow_shortfall: false,
        }
    }
}

impl SelectionConfig {
    pub fn constraints(&self) -> PortfolioConstraints {
        PortfolioConstraints {
            max_weight_per_asset: self.max_weight_per_asset,
            max_weight_per_cluster: self.max_weight_per_cluster,
        }
    }
}

/// Composite score of one asset with its normalized components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreCard {
    pub asset_id: AssetId,
    pub cluster_label: ClusterLabel,
    pub return_norm: f64,
    pub momentum_norm: f64,
    pub sharpe_norm: f64,
    pub beta_adj: f64,
    pub score: f64,
    /// Raw Sharpe ratio, the first tie-breaker.
    pub sharpe: f64,
    pub annualized_return: f64,
}

/// Score every assigned asset of the matrix within its cluster.
pub fn score_assets(
    matrix: &FeatureMatrix,
    assignment: &ClusterAssignment,
    weights: &ScoringWeights,
    beta_preference: BetaPreference,
) -> Vec<ScoreCard> {
    let mut cards = Vec::new();
    for label in assignment.cluster_sizes().into_keys() {
        let members = matrix.filter(|id| assignment.label(id) == Some(label));
        if members.is_empty() {
            continue;
        }
        let ret = stats::min_max_normalize(&members.column(Metric::ReturnAnnualized));
        let mom = stats::min_max_normalize(&members.column(Metric::Momentum6m));
        let sharpe = stats::min_max_normalize(&members.column(Metric::SharpeRatio));
        let beta = stats::min_max_normalize(&members.column(Metric::Beta));

        for (i, (asset_id, vector)) in members.rows().iter().enumerate() {
            let beta_adj = match beta_preference {
                BetaPreference::Low => 1.0 - beta[i],
                BetaPreference::High => beta[i],
            };
            let score = weights.ret * ret[i]
                + weights.momentum * mom[i]
                + weights.sharpe * sharpe[i]
                + weights.beta * beta_adj;
            cards.push(ScoreCard {
                asset_id: asset_id.clone(),
                cluster_label: label,
                return_norm: ret[i],
                momentum_norm: mom[i],
                sharpe_norm: sharpe[i],
                beta_adj,
                score,
                sharpe: vector.get(Metric::SharpeRatio),
                annualized_return: vector.get(Metric::ReturnAnnualized),
            });
        }
    }
    cards
}

/// Score descending, then Sharpe descending, then asset id ascending.
fn rank_order(a: &ScoreCard, b: &ScoreCard) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.sharpe.total_cmp(&a.sharpe))
        .then_with(|| a.asset_id.cmp(&b.asset_id))
}

/// Builds one portfolio per risk profile.
pub struct Selector {
    config: SelectionConfig,
}

impl Selector {
    pub fn new(config: SelectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SelectionConfig {
        &self.config
    }

    pub fn select(
        &self,
        matrix: &FeatureMatrix,
        assignment: &ClusterAssignment,
        profile: &RiskProfile,
    ) -> Result<Portfolio> {
        let weights = profile.weights.unwrap_or(self.config.weights);
        let cards = score_assets(matrix, assignment, &weights, profile.beta_preference);

        let mut by_cluster: BTreeMap<ClusterLabel, Vec<ScoreCard>> = BTreeMap::new();
        for card in cards {
            by_cluster.entry(card.cluster_label).or_default().push(card);
        }

        let targets = profile.targets();
        let mut seen = HashSet::new();
        let order: Vec<ClusterLabel> = profile
            .distribution
            .iter()
            .map(|t| t.cluster)
            .filter(|c| seen.insert(*c))
            .collect();

        let mut picked: Vec<ScoreCard> = Vec::new();
        let mut shortfalls = Vec::new();
        for cluster in order {
            let target = targets.get(&cluster).copied().unwrap_or(0);
            if target == 0 {
                continue;
            }
            let mut candidates: Vec<ScoreCard> = by_cluster
                .get(&cluster)
                .map(|cards| {
                    cards
                        .iter()
                        .filter(|c| {
                            cluster != OUTLIER_LABEL
                                || c.annualized_return > self.config.outlier_min_return
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            candidates.sort_by(rank_order);

            if candidates.len() < target {
                if !self.config.allow_shortfall {
                    return Err(PipelineError::ConstraintViolation(format!(
                        "profile {}: cluster {} has {} eligible candidates, target is {}",
                        profile.name,
                        cluster,
                        candidates.len(),
                        target
                    )));
                }
                warn!(
                    "Profile {}: cluster {} short by {} assets",
                    profile.name,
                    cluster,
                    target - candidates.len()
                );
                shortfalls.push(Shortfall {
                    cluster,
                    target,
                    available: candidates.len(),
                });
            }
            candidates.truncate(target);
            debug!(
                "Profile {}: cluster {} -> {:?}",
                profile.name,
                cluster,
                candidates.iter().map(|c| c.asset_id.as_str()).collect::<Vec<_>>()
            );
            picked.extend(candidates);
        }

        if picked.len() < self.config.min_assets {
            return Err(PipelineError::ConstraintViolation(format!(
                "profile {}: {} assets selected, minimum is {}",
                profile.name,
                picked.len(),
                self.config.min_assets
            )));
        }

        let constraints = self.config.constraints();
        let labels: Vec<ClusterLabel> = picked.iter().map(|c| c.cluster_label).collect();
        let asset_weights = capped_equal_weights(&labels, &constraints).map_err(|e| match e {
            PipelineError::ConstraintViolation(msg) => {
                PipelineError::ConstraintViolation(format!("profile {}: {}", profile.name, msg))
            }
            other => other,
        })?;

        let holdings: Vec<Holding> = picked
            .into_iter()
            .zip(asset_weights)
            .map(|(card, weight)| Holding {
                asset_id: card.asset_id,
                cluster_label: card.cluster_label,
                score: card.score,
                weight,
            })
            .collect();
        constraints.validate_weights(&holdings)?;

        info!(
            "Profile {}: {} holdings across {} clusters",
            profile.name,
            holdings.len(),
            targets.len()
        );
        Ok(Portfolio {
            profile: profile.name.clone(),
            holdings,
            shortfalls,
        })
    }
}
