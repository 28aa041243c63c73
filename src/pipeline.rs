//! End-to-end orchestration.
//!
//! Training prices go through feature building, outlier detection and
//! segmentation once. Each risk profile then gets its own selection and
//! backtest over the test prices. Per-asset problems become exclusions,
//! per-profile problems become [`ProfileFailure`]s, and only a structural
//! failure (bad config, degenerate clustering) aborts the run.

use crate::clustering::{ClusterAssignment, KMeans, KSweepPoint, Segmentation, Segmenter};
use crate::config::PipelineConfig;
use crate::engine::{BacktestEngine, BacktestResult};
use crate::error::{PipelineError, Result};
use crate::features::{FeatureBuilder, FeatureMatrix};
use crate::metadata::RunMetadata;
use crate::outliers::{OutlierDetector, OutlierReport};
use crate::portfolio::Portfolio;
use crate::profiles::RiskProfile;
use crate::scaler::StandardScaler;
use crate::selection::Selector;
use crate::types::{AssetId, Exclusion, PriceSeries, Stage};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::{info, warn};

/// Price data for one run.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub train: Vec<PriceSeries>,
    pub train_benchmark: PriceSeries,
    pub test: Vec<PriceSeries>,
    pub test_benchmark: PriceSeries,
}

impl PipelineInput {
    /// Build an input from two loaded universes that both contain the
    /// benchmark series.
    pub fn from_series(
        train: Vec<PriceSeries>,
        test: Vec<PriceSeries>,
        benchmark_id: &str,
    ) -> Result<Self> {
        let find = |set: &[PriceSeries], which: &str| {
            set.iter()
                .find(|s| s.asset_id() == benchmark_id)
                .cloned()
                .ok_or_else(|| {
                    PipelineError::InvalidInput(format!(
                        "benchmark {} not found in {} data",
                        benchmark_id, which
                    ))
                })
        };
        let train_benchmark = find(&train, "training")?;
        let test_benchmark = find(&test, "test")?;
        Ok(Self {
            train,
            train_benchmark,
            test,
            test_benchmark,
        })
    }
}

/// Why a profile produced no portfolio or no backtest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileFailure {
    pub stage: Stage,
    pub kind: String,
    pub reason: String,
}

impl ProfileFailure {
    pub fn new(stage: Stage, error: &PipelineError) -> Self {
        Self {
            stage,
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

/// Result of one risk profile.
///
/// A portfolio without a backtest means selection succeeded and the
/// backtest failed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileOutcome {
    pub profile: String,
    pub portfolio: Option<Portfolio>,
    pub backtest: Option<BacktestResult>,
    pub failure: Option<ProfileFailure>,
}

impl ProfileOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.backtest.is_some()
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub metadata: RunMetadata,
    /// Training assets supplied, not counting the benchmark.
    pub universe_size: usize,
    pub exclusions: Vec<Exclusion>,
    pub features: FeatureMatrix,
    pub outliers: OutlierReport,
    pub segmentation: Segmentation,
    pub profiles: Vec<ProfileOutcome>,
}

impl RunReport {
    pub fn outcome(&self, profile: &str) -> Option<&ProfileOutcome> {
        self.profiles.iter().find(|o| o.profile == profile)
    }

    pub fn failed_profiles(&self) -> Vec<&ProfileOutcome> {
        self.profiles.iter().filter(|o| !o.is_success()).collect()
    }
}

/// Runs every stage with one immutable configuration.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, input: &PipelineInput) -> Result<RunReport> {
        self.config.validate()?;
        let metadata = RunMetadata::new(&self.config, &[&input.train[..], &input.test[..]]);
        info!("Starting run {}", metadata.run_id);

        let (universe, mut exclusions) = self.universe(&input.train);
        let universe_size = universe.len();
        let build = FeatureBuilder::new(self.config.features.clone())
            .build(&universe, &input.train_benchmark)?;
        exclusions.extend(build.exclusions);
        let matrix = build.matrix;

        let outliers = OutlierDetector::new(self.config.outliers.clone()).detect(&matrix)?;
        let segmentation =
            Segmenter::new(self.config.clustering.clone()).segment(&matrix, &outliers)?;

        let profiles = self.build_portfolios(
            &matrix,
            &segmentation.assignment,
            &input.test,
            &input.test_benchmark,
        );

        let succeeded = profiles.iter().filter(|o| o.is_success()).count();
        info!(
            "Run {} finished: {}/{} profiles succeeded, {} assets excluded",
            metadata.run_id,
            succeeded,
            profiles.len(),
            exclusions.len()
        );

        Ok(RunReport {
            metadata,
            universe_size,
            exclusions,
            features: matrix,
            outliers,
            segmentation,
            profiles,
        })
    }

    /// Inertia and silhouette for each K in `k_range`, computed on the same
    /// standardized inliers the segmentation stage would cluster.
    pub fn k_sweep(
        &self,
        train: &[PriceSeries],
        k_range: RangeInclusive<usize>,
    ) -> Result<Vec<KSweepPoint>> {
        self.config.validate()?;
        let benchmark = train
            .iter()
            .find(|s| s.asset_id() == self.config.benchmark_id)
            .ok_or_else(|| {
                PipelineError::InvalidInput(format!(
                    "benchmark {} not found in training data",
                    self.config.benchmark_id
                ))
            })?;

        let (universe, _) = self.universe(train);
        let matrix = FeatureBuilder::new(self.config.features.clone())
            .build(&universe, benchmark)?
            .matrix;
        let outliers = OutlierDetector::new(self.config.outliers.clone()).detect(&matrix)?;
        let inliers = matrix.filter(|id| !outliers.is_outlier(id));
        info!(
            "Sweeping K over {:?} on {} inliers",
            k_range,
            inliers.len()
        );

        let (_, points) = StandardScaler::fit_transform(&inliers.to_rows());
        KMeans::new(self.config.clustering.clone()).sweep(&points, k_range)
    }

    /// Select and backtest every configured profile against a fixed
    /// segmentation. Failures stay local to their profile.
    pub fn build_portfolios(
        &self,
        matrix: &FeatureMatrix,
        assignment: &ClusterAssignment,
        test: &[PriceSeries],
        test_benchmark: &PriceSeries,
    ) -> Vec<ProfileOutcome> {
        let prices: BTreeMap<AssetId, PriceSeries> = test
            .iter()
            .map(|s| (s.asset_id().to_string(), s.clone()))
            .collect();
        self.config
            .profiles
            .iter()
            .map(|profile| self.run_profile(profile, matrix, assignment, &prices, test_benchmark))
            .collect()
    }

    pub fn run_profile(
        &self,
        profile: &RiskProfile,
        matrix: &FeatureMatrix,
        assignment: &ClusterAssignment,
        prices: &BTreeMap<AssetId, PriceSeries>,
        benchmark: &PriceSeries,
    ) -> ProfileOutcome {
        let selector = Selector::new(self.config.scoring.clone());
        let portfolio = match selector.select(matrix, assignment, profile) {
            Ok(p) => p,
            Err(err) => {
                warn!("Profile {} skipped at selection: {}", profile.name, err);
                return ProfileOutcome {
                    profile: profile.name.clone(),
                    portfolio: None,
                    backtest: None,
                    failure: Some(ProfileFailure::new(Stage::Selection, &err)),
                };
            }
        };

        let mut engine = BacktestEngine::new(self.config.backtest.clone())
            .with_trading_days(self.config.features.trading_days_per_year);
        match engine.run(&portfolio, prices, benchmark) {
            Ok(result) => ProfileOutcome {
                profile: profile.name.clone(),
                portfolio: Some(portfolio),
                backtest: Some(result),
                failure: None,
            },
            Err(err) => ProfileOutcome {
                profile: profile.name.clone(),
                portfolio: Some(portfolio),
                backtest: None,
                failure: Some(ProfileFailure::new(Stage::Backtest, &err)),
            },
        }
    }

    fn universe(&self, train: &[PriceSeries]) -> (Vec<PriceSeries>, Vec<Exclusion>) {
        let mut exclusions = Vec::new();
        let mut universe = Vec::with_capacity(train.len());
        for series in train {
            if series.asset_id() == self.config.benchmark_id {
                let reason = PipelineError::InvalidInput("asset is the benchmark".to_string());
                info!("Removing benchmark {} from the universe", series.asset_id());
                exclusions.push(Exclusion::new(series.asset_id(), Stage::Universe, &reason));
            } else {
                universe.push(series.clone());
            }
        }
        (universe, exclusions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(id: &str, closes: &[f64]) -> PriceSeries {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let pairs = closes
            .iter()
            .enumerate()
            .map(|(i, c)| (start + Duration::days(i as i64), *c))
            .collect::<Vec<_>>();
        PriceSeries::from_pairs(id, pairs).unwrap()
    }

    #[test]
    fn test_input_requires_benchmark() {
        let train = vec![series("A", &[1.0, 2.0]), series("SPY", &[1.0, 1.1])];
        let test = vec![series("A", &[2.0, 2.1])];
        let err = PipelineInput::from_series(train.clone(), test, "SPY").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));

        let test = vec![series("A", &[2.0, 2.1]), series("SPY", &[1.1, 1.2])];
        let input = PipelineInput::from_series(train, test, "SPY").unwrap();
        assert_eq!(input.train_benchmark.asset_id(), "SPY");
        assert_eq!(input.test_benchmark.closes(), vec![1.1, 1.2]);
    }

    #[test]
    fn test_benchmark_removed_from_universe() {
        let pipeline = Pipeline::new(PipelineConfig::default());
        let train = vec![series("A", &[1.0, 2.0]), series("SPY", &[1.0, 1.1])];
        let (universe, exclusions) = pipeline.universe(&train);
        assert_eq!(universe.len(), 1);
        assert_eq!(universe[0].asset_id(), "A");
        assert_eq!(exclusions.len(), 1);
        assert_eq!(exclusions[0].stage, Stage::Universe);
    }

    #[test]
    fn test_invalid_config_aborts_run() {
        let mut config = PipelineConfig::default();
        config.clustering.n_clusters = 0;
        let bench = series("SPY", &[1.0, 1.1]);
        let input = PipelineInput {
            train: vec![bench.clone()],
            train_benchmark: bench.clone(),
            test: vec![bench.clone()],
            test_benchmark: bench,
        };
        let err = Pipeline::new(config).run(&input).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }

    #[test]
    fn test_selection_failure_is_local() {
        let mut config = PipelineConfig::default();
        config.scoring.min_assets = 1;
        config.scoring.max_weight_per_asset = 1.0;
        config.scoring.max_weight_per_cluster = 1.0;
        config.profiles = vec![
            RiskProfile::new("Missing", &[(9, 1)], crate::profiles::BetaPreference::Low),
        ];
        let pipeline = Pipeline::new(config);
        let outcomes = pipeline.build_portfolios(
            &FeatureMatrix::default(),
            &ClusterAssignment::default(),
            &[],
            &series("SPY", &[1.0, 1.1]),
        );
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_success());
        let failure = outcomes[0].failure.as_ref().unwrap();
        assert_eq!(failure.stage, Stage::Selection);
        assert_eq!(failure.kind, "constraint_violation");
    }
}
