//! Configuration file support.
//!
//! Loads pipeline configuration from TOML files. Every section and field is
//! optional and falls back to its default.
//!
//! # Example Configuration
//!
//! ```toml
//! benchmark_id = "SPY"
//!
//! [features]
//! risk_free_rate = 0.05
//!
//! [clustering]
//! n_clusters = 4
//! seed = 42
//!
//! [scoring]
//! max_weight_per_asset = 0.20
//! max_weight_per_cluster = 0.40
//!
//! [[profiles]]
//! name = "Conservative"
//! beta_preference = "low"
//! distribution = [{ cluster = 0, count = 4 }, { cluster = 1, count = 3 }, { cluster = 2, count = 3 }]
//! ```

use crate::clustering::ClusteringConfig;
use crate::engine::BacktestConfig;
use crate::error::{PipelineError, Result};
use crate::features::FeatureConfig;
use crate::outliers::OutlierConfig;
use crate::profiles::RiskProfile;
use crate::selection::SelectionConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete pipeline configuration.
///
/// Built once and passed by reference into every stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Asset id of the benchmark series; it is removed from the universe.
    #[serde(default = "default_benchmark_id")]
    pub benchmark_id: String,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub outliers: OutlierConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,
    #[serde(default)]
    pub scoring: SelectionConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default = "RiskProfile::canonical")]
    pub profiles: Vec<RiskProfile>,
}

fn default_benchmark_id() -> String {
    "SPY".to_string()
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            benchmark_id: default_benchmark_id(),
            features: FeatureConfig::default(),
            outliers: OutlierConfig::default(),
            clustering: ClusteringConfig::default(),
            scoring: SelectionConfig::default(),
            backtest: BacktestConfig::default(),
            profiles: RiskProfile::canonical(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| PipelineError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reject values no stage can work with.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(PipelineError::ConfigError(msg));

        let f = &self.features;
        if f.trading_days_per_year == 0 {
            return fail("features.trading_days_per_year must be positive".into());
        }
        if !(f.confidence_level > 0.0 && f.confidence_level < 1.0) {
            return fail(format!(
                "features.confidence_level must be in (0, 1), got {}",
                f.confidence_level
            ));
        }
        if f.momentum_window == 0 || f.vol_of_vol_window < 2 {
            return fail("features.momentum_window must be >= 1 and vol_of_vol_window >= 2".into());
        }

        let o = &self.outliers;
        if o.min_samples == 0 {
            return fail("outliers.min_samples must be at least 1".into());
        }
        if !(0.0..=100.0).contains(&o.eps_percentile) {
            return fail(format!(
                "outliers.eps_percentile must be in [0, 100], got {}",
                o.eps_percentile
            ));
        }

        let c = &self.clustering;
        if c.n_clusters < 2 {
            return fail(format!("clustering.n_clusters must be >= 2, got {}", c.n_clusters));
        }
        if c.n_init == 0 || c.max_iter == 0 {
            return fail("clustering.n_init and max_iter must be positive".into());
        }

        let s = &self.scoring;
        if !s.weights.is_valid() {
            return fail("scoring.weights must be finite and non-negative".into());
        }
        for (name, cap) in [
            ("max_weight_per_asset", s.max_weight_per_asset),
            ("max_weight_per_cluster", s.max_weight_per_cluster),
        ] {
            if !(cap > 0.0 && cap <= 1.0) {
                return fail(format!("scoring.{} must be in (0, 1], got {}", name, cap));
            }
        }

        let b = &self.backtest;
        if !(b.initial_capital > 0.0 && b.initial_capital.is_finite()) {
            return fail(format!(
                "backtest.initial_capital must be positive, got {}",
                b.initial_capital
            ));
        }
        if !(0.0..1.0).contains(&b.transaction_cost) {
            return fail(format!(
                "backtest.transaction_cost must be in [0, 1), got {}",
                b.transaction_cost
            ));
        }
        if b.rolling_window < 2 {
            return fail(format!(
                "backtest.rolling_window must be at least 2, got {}",
                b.rolling_window
            ));
        }

        let mut names = std::collections::HashSet::new();
        for p in &self.profiles {
            if !names.insert(p.name.as_str()) {
                return fail(format!("duplicate profile name: {}", p.name));
            }
            if p.weights.map_or(false, |w| !w.is_valid()) {
                return fail(format!("profile {}: weights must be non-negative", p.name));
            }
        }

        Ok(())
    }

    /// Annotated example configuration.
    pub fn example() -> String {
        r#"# clusterfolio configuration
# Every value shown is the default.

# Benchmark series id (removed from the asset universe)
benchmark_id = "SPY"

[features]
trading_days_per_year = 252
risk_free_rate = 0.05        # annual
confidence_level = 0.05      # VaR/CVaR tail probability
momentum_window = 126        # observations (~6 months)
vol_of_vol_window = 21       # rolling volatility window

[outliers]
min_samples = 5
eps_percentile = 90.0        # percentile of k-distance used as eps

[clustering]
n_clusters = 4
n_init = 10
max_iter = 300
seed = 42

[scoring]
outlier_min_return = 0.0     # outliers need an annualized return above this
max_weight_per_asset = 0.20
max_weight_per_cluster = 0.40
min_assets = 5
allow_shortfall = false

[scoring.weights]
return = 0.35
momentum = 0.30
sharpe = 0.15
beta = 0.20

[backtest]
initial_capital = 10000.0
transaction_cost = 0.001     # round trip, charged once
risk_free_rate = 0.05
rolling_window = 21          # trading days per rolling metric window

# Risk profiles: cluster -> asset count. Cluster -1 is the outlier segment.
[[profiles]]
name = "Conservative"
beta_preference = "low"
distribution = [{ cluster = 0, count = 4 }, { cluster = 1, count = 3 }, { cluster = 2, count = 3 }]

[[profiles]]
name = "Moderate"
beta_preference = "low"
distribution = [{ cluster = 0, count = 3 }, { cluster = 1, count = 3 }, { cluster = 2, count = 2 }, { cluster = 3, count = 2 }]

[[profiles]]
name = "Balanced"
beta_preference = "low"
distribution = [{ cluster = 0, count = 2 }, { cluster = 1, count = 2 }, { cluster = 2, count = 2 }, { cluster = 3, count = 2 }, { cluster = -1, count = 2 }]

[[profiles]]
name = "Aggressive"
beta_preference = "high"
distribution = [{ cluster = 1, count = 2 }, { cluster = 2, count = 3 }, { cluster = 3, count = 3 }, { cluster = -1, count = 2 }]

[[profiles]]
name = "Speculative"
beta_preference = "high"
distribution = [{ cluster = 2, count = 3 }, { cluster = 3, count = 3 }, { cluster = -1, count = 4 }]
"#
        .to_string()
    }
}
