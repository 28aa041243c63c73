//! Clusterfolio - cluster-based asset segmentation and risk-profile portfolios.
//!
//! # Overview
//!
//! Clusterfolio turns a universe of daily price histories into a set of
//! risk-profile portfolios and tests them on held-out data:
//!
//! - **Features**: 21 return, risk, efficiency, market-exposure, shape and
//!   momentum metrics per asset
//! - **Outliers**: density-based detection on standardized features
//! - **Segmentation**: seeded k-means with silhouette, Davies-Bouldin and a
//!   2D PCA projection, plus a K sweep for choosing the cluster count
//! - **Selection**: per-cluster composite scoring and cap-aware equal weighting
//! - **Backtesting**: buy-and-hold replay against a benchmark, with monthly
//!   and rolling series
//! - **Configuration files**: TOML-based configuration for reproducible runs
//!
//! # Quick Start
//!
//! ```no_run
//! use clusterfolio::{
//!     config::PipelineConfig,
//!     data::{load_prices, DataConfig},
//!     pipeline::{Pipeline, PipelineInput},
//! };
//!
//! let config = PipelineConfig::default();
//! let train = load_prices("data/train.csv", &DataConfig::default()).unwrap();
//! let test = load_prices("data/test.csv", &DataConfig::default()).unwrap();
//! let input = PipelineInput::from_series(train, test, &config.benchmark_id).unwrap();
//!
//! let report = Pipeline::new(config).run(&input).unwrap();
//! for outcome in &report.profiles {
//!     if let Some(bt) = &outcome.backtest {
//!         println!("{}: {:.2}%", outcome.profile, bt.metrics.total_return * 100.0);
//!     }
//! }
//! ```
//!
//! # Custom Profiles
//!
//! Risk profiles are data. A profile maps cluster labels to asset counts;
//! label `-1` draws from the outlier segment.
//!
//! ```
//! use clusterfolio::profiles::{BetaPreference, RiskProfile};
//!
//! let income = RiskProfile::new("Income", &[(0, 3), (1, 2)], BetaPreference::Low);
//! assert_eq!(income.total_assets(), 5);
//! assert!(!income.includes_outliers());
//! ```
//!
//! # Modules
//!
//! - [`types`]: Price series, equity points, stages and exclusions
//! - [`stats`]: Descriptive statistics shared by every stage
//! - [`features`]: Per-asset metric computation and the feature matrix
//! - [`scaler`]: Column standardization
//! - [`outliers`]: Density-based outlier detection
//! - [`clustering`]: K-means segmentation and its diagnostics
//! - [`profiles`]: Risk profile records
//! - [`selection`]: Composite scoring and portfolio selection
//! - [`portfolio`]: Portfolios and capped weighting
//! - [`engine`]: Buy-and-hold backtest engine
//! - [`analytics`]: Performance metrics and reporting
//! - [`config`]: TOML configuration file support
//! - [`metadata`]: Run provenance
//! - [`pipeline`]: End-to-end orchestration

pub mod analytics;
pub mod clustering;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod features;
pub mod metadata;
pub mod outliers;
pub mod pipeline;
pub mod portfolio;
pub mod profiles;
pub mod scaler;
pub mod selection;
pub mod stats;
pub mod types;

// Re-exports for convenience
pub use analytics::{BenchmarkMetrics, PerformanceMetrics, ResultFormatter};
pub use clustering::{ClusterAssignment, ClusterSummary, Segmentation, Segmenter};
pub use config::PipelineConfig;
pub use engine::{BacktestConfig, BacktestEngine, BacktestResult};
pub use error::{PipelineError, Result};
pub use features::{FeatureBuilder, FeatureMatrix, FeatureVector, Metric};
pub use outliers::{OutlierDetector, OutlierReport};
pub use pipeline::{Pipeline, PipelineInput, RunReport};
pub use portfolio::{Holding, Portfolio, PortfolioConstraints};
pub use profiles::{BetaPreference, RiskProfile, ScoringWeights};
pub use selection::Selector;
pub use types::{AssetId, ClusterLabel, EquityPoint, PricePoint, PriceSeries, OUTLIER_LABEL};
