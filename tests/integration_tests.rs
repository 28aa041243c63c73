//! Integration tests for the segmentation pipeline.

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use clusterfolio::clustering::{best_k, ClusterAssignment, ClusteringConfig, Segmenter};
use clusterfolio::config::PipelineConfig;
use clusterfolio::engine::{BacktestConfig, BacktestEngine, BacktestState};
use clusterfolio::error::PipelineError;
use clusterfolio::features::{FeatureMatrix, FeatureVector, Metric, METRIC_COUNT};
use clusterfolio::outliers::{OutlierConfig, OutlierDetector};
use clusterfolio::pipeline::{Pipeline, PipelineInput};
use clusterfolio::portfolio::{Holding, Portfolio, WEIGHT_TOLERANCE};
use clusterfolio::profiles::{BetaPreference, RiskProfile, ScoringWeights};
use clusterfolio::selection::{score_assets, SelectionConfig, Selector};
use clusterfolio::types::{PriceSeries, Stage};

const TRAIN_DAYS: usize = 300;
const TEST_DAYS: usize = 60;

fn calendar(n: usize) -> Vec<NaiveDate> {
    let start = NaiveDate::from_ymd_opt(2022, 1, 3).unwrap();
    (0..n).map(|i| start + Duration::days(i as i64)).collect()
}

fn path(start: f64, returns: &[f64]) -> Vec<f64> {
    let mut price = start;
    let mut out = vec![price];
    for r in returns {
        price *= 1.0 + r;
        out.push(price);
    }
    out
}

/// Split one price path into a training series and a following test series.
fn split(id: &str, dates: &[NaiveDate], prices: &[f64]) -> (PriceSeries, PriceSeries) {
    let train = PriceSeries::from_pairs(
        id,
        dates[..TRAIN_DAYS].iter().copied().zip(prices[..TRAIN_DAYS].iter().copied()),
    )
    .unwrap();
    let test = PriceSeries::from_pairs(
        id,
        dates[TRAIN_DAYS..].iter().copied().zip(prices[TRAIN_DAYS..].iter().copied()),
    )
    .unwrap();
    (train, test)
}

/// Forty assets in four behaviour groups plus an `SPY` benchmark, in both
/// training and test universes.
fn synthetic_universe(seed: u64) -> (Vec<PriceSeries>, Vec<PriceSeries>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let n = TRAIN_DAYS + TEST_DAYS;
    let dates = calendar(n);

    let market: Vec<f64> = (0..n - 1)
        .map(|_| 0.0004 + 0.01 * rng.gen_range(-1.0..1.0))
        .collect();

    let groups = [
        ("DEF", 12, 0.0002, 0.5, 0.004),
        ("MKT", 12, 0.0004, 1.0, 0.008),
        ("GRW", 12, 0.0008, 1.5, 0.015),
        ("SPC", 4, 0.0012, 2.0, 0.030),
    ];

    let (spy_train, spy_test) = split("SPY", &dates, &path(400.0, &market));
    let mut train = vec![spy_train];
    let mut test = vec![spy_test];

    for (prefix, count, drift, beta, vol) in groups {
        for i in 0..count {
            let returns: Vec<f64> = market
                .iter()
                .map(|m| drift + beta * (m - 0.0004) + vol * rng.gen_range(-1.0..1.0))
                .collect();
            let id = format!("{}{:02}", prefix, i);
            let (tr, te) = split(&id, &dates, &path(50.0 + i as f64, &returns));
            train.push(tr);
            test.push(te);
        }
    }
    (train, test)
}

fn run_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.scoring.max_weight_per_asset = 0.30;
    config.scoring.max_weight_per_cluster = 0.50;
    config.scoring.min_assets = 4;
    config.profiles = vec![
        RiskProfile::new("Core", &[(0, 1), (1, 1), (2, 1), (3, 1)], BetaPreference::Low),
        RiskProfile::new("Impossible", &[(9, 3)], BetaPreference::High),
    ];
    config
}

fn vector(asset: &str, set: &[(Metric, f64)]) -> FeatureVector {
    let mut values = [0.0; METRIC_COUNT];
    for (metric, value) in set {
        values[metric.index()] = *value;
    }
    FeatureVector::from_values(asset, values).unwrap()
}

fn daily(id: &str, closes: &[f64]) -> PriceSeries {
    PriceSeries::from_pairs(id, calendar(closes.len()).into_iter().zip(closes.iter().copied()))
        .unwrap()
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[test]
fn test_three_asset_scenario() {
    let matrix = FeatureMatrix::new(vec![
        (
            "A".to_string(),
            vector(
                "A",
                &[
                    (Metric::ReturnAnnualized, 0.10),
                    (Metric::VolatilityAnnual, 0.05),
                    (Metric::SharpeRatio, 1.0),
                    (Metric::Beta, 0.4),
                    (Metric::Momentum6m, 0.05),
                ],
            ),
        ),
        (
            "B".to_string(),
            vector(
                "B",
                &[
                    (Metric::ReturnAnnualized, 0.0),
                    (Metric::VolatilityAnnual, 0.30),
                    (Metric::SharpeRatio, -0.17),
                    (Metric::Beta, 1.1),
                ],
            ),
        ),
        (
            "C".to_string(),
            vector(
                "C",
                &[
                    (Metric::ReturnAnnualized, 0.50),
                    (Metric::Skewness, 25.0),
                    (Metric::SharpeRatio, 2.0),
                ],
            ),
        ),
    ])
    .unwrap();
    let assignment = ClusterAssignment::from_pairs([("A", 0), ("B", 0), ("C", -1)]);

    let cards = score_assets(&matrix, &assignment, &ScoringWeights::default(), BetaPreference::Low);
    let card = |id: &str| cards.iter().find(|c| c.asset_id == id).unwrap();
    assert_eq!(card("A").return_norm, 1.0);
    assert_eq!(card("B").return_norm, 0.0);

    let mut config = PipelineConfig::default();
    config.scoring.max_weight_per_asset = 1.0;
    config.scoring.max_weight_per_cluster = 1.0;
    config.scoring.min_assets = 2;
    config.profiles = vec![RiskProfile::new("Inlier", &[(0, 2)], BetaPreference::Low)];
    let cost = config.backtest.transaction_cost;

    let test = vec![
        daily("A", &[100.0, 101.0, 103.0, 104.0, 105.0]),
        daily("B", &[50.0, 50.0, 50.0, 50.0, 50.0]),
        daily("C", &[10.0, 11.0, 12.0, 13.0, 14.0]),
    ];
    let bench = daily("SPY", &[400.0, 401.0, 402.0, 403.0, 404.0]);

    let outcomes = Pipeline::new(config).build_portfolios(&matrix, &assignment, &test, &bench);
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(outcome.is_success(), "{:?}", outcome.failure);

    let portfolio = outcome.portfolio.as_ref().unwrap();
    let mut ids = portfolio.asset_ids();
    ids.sort();
    assert_eq!(ids, vec!["A", "B"]);
    assert!((portfolio.weight_of("A").unwrap() - 0.5).abs() < 1e-12);
    assert!((portfolio.weight_of("B").unwrap() - 0.5).abs() < 1e-12);

    let bt = outcome.backtest.as_ref().unwrap();
    let expected = 1.025 * (1.0 - cost) - 1.0;
    assert!((bt.metrics.total_return - expected).abs() < 1e-9);
}

#[test]
fn test_detected_outlier_is_held_out_of_selection() {
    // Seven ordinary assets on a line and one with extreme skew and return.
    let mut rows: Vec<(String, FeatureVector)> = (0..7)
        .map(|i| {
            let id = format!("N{}", i);
            let x = i as f64;
            let v = vector(
                &id,
                &[
                    (Metric::ReturnAnnualized, 0.10 + 0.01 * x),
                    (Metric::VolatilityAnnual, 0.20 + 0.005 * x),
                    (Metric::SharpeRatio, 1.0 - 0.02 * x),
                ],
            );
            (id, v)
        })
        .collect();
    rows.push((
        "C".to_string(),
        vector(
            "C",
            &[
                (Metric::ReturnAnnualized, 0.50),
                (Metric::VolatilityAnnual, 0.215),
                (Metric::SharpeRatio, 0.94),
                (Metric::Skewness, 25.0),
            ],
        ),
    ));
    let matrix = FeatureMatrix::new(rows).unwrap();

    let outliers = OutlierDetector::new(OutlierConfig {
        min_samples: 2,
        ..Default::default()
    })
    .detect(&matrix)
    .unwrap();
    assert_eq!(outliers.outliers(), vec!["C"]);

    let segmentation = Segmenter::new(ClusteringConfig {
        n_clusters: 2,
        ..Default::default()
    })
    .segment(&matrix, &outliers)
    .unwrap();
    assert!(segmentation.assignment.is_outlier("C"));

    let selector = Selector::new(SelectionConfig {
        max_weight_per_asset: 1.0,
        max_weight_per_cluster: 1.0,
        min_assets: 2,
        ..Default::default()
    });
    let profile = RiskProfile::new("Inlier", &[(0, 1), (1, 1)], BetaPreference::Low);
    let portfolio = selector
        .select(&matrix, &segmentation.assignment, &profile)
        .unwrap();
    assert_eq!(portfolio.len(), 2);
    assert!(portfolio.weight_of("C").is_none());
}

#[test]
fn test_identical_assets_are_degenerate() {
    let rows: Vec<(String, FeatureVector)> = (0..6)
        .map(|i| {
            let id = format!("X{}", i);
            let v = vector(&id, &[(Metric::ReturnAnnualized, 0.1), (Metric::Beta, 1.0)]);
            (id, v)
        })
        .collect();
    let matrix = FeatureMatrix::new(rows).unwrap();
    let outliers = OutlierDetector::new(OutlierConfig::default()).detect(&matrix).unwrap();
    assert_eq!(outliers.n_outliers(), 0);

    // Two clusters requested, one populated after k-means.
    let err = Segmenter::new(ClusteringConfig {
        n_clusters: 2,
        ..Default::default()
    })
    .segment(&matrix, &outliers)
    .unwrap_err();
    assert!(matches!(err, PipelineError::ClusteringDegenerate(_)));
    assert!(err.to_string().contains("silhouette"), "{}", err);
}

#[test]
fn test_small_universe_names_outlier_stage() {
    let rows: Vec<(String, FeatureVector)> = (0..3)
        .map(|i| {
            let id = format!("S{}", i);
            let v = vector(&id, &[(Metric::ReturnAnnualized, 0.1 * i as f64)]);
            (id, v)
        })
        .collect();
    let matrix = FeatureMatrix::new(rows).unwrap();
    let err = OutlierDetector::new(OutlierConfig::default()).detect(&matrix).unwrap_err();
    assert_eq!(err.kind(), "clustering_degenerate");
    assert!(err.to_string().contains("outlier detection"), "{}", err);
}

#[test]
fn test_full_pipeline_on_synthetic_universe() {
    let (train, test) = synthetic_universe(7);
    let input = PipelineInput::from_series(train, test, "SPY").unwrap();
    let report = Pipeline::new(run_config()).run(&input).unwrap();

    assert_eq!(report.universe_size, 40);
    assert!(report
        .exclusions
        .iter()
        .any(|e| e.asset_id == "SPY" && e.stage == Stage::Universe));
    assert!(report.features.get("SPY").is_none());
    // The benchmark is excluded on top of the forty candidate assets.
    assert_eq!(report.features.len() + report.exclusions.len(), 41);

    // Every featured asset has a label, outliers carry -1.
    assert_eq!(report.segmentation.assignment.len(), report.features.len());
    for id in report.outliers.outliers() {
        assert!(report.segmentation.assignment.is_outlier(id));
    }
    let d = &report.segmentation.diagnostics;
    assert!((-1.0..=1.0).contains(&d.silhouette));
    assert!(d.inertia >= 0.0);
    assert_eq!(report.segmentation.projection.len(), report.features.len());

    let core = report.outcome("Core").unwrap();
    assert!(core.is_success(), "{:?}", core.failure);
    let portfolio = core.portfolio.as_ref().unwrap();
    assert_eq!(portfolio.len(), 4);
    assert!((portfolio.total_weight() - 1.0).abs() < WEIGHT_TOLERANCE);
    for h in &portfolio.holdings {
        assert!(h.weight <= 0.30 + WEIGHT_TOLERANCE);
    }
    for w in portfolio.cluster_weights().values() {
        assert!(*w <= 0.50 + WEIGHT_TOLERANCE);
    }

    let bt = core.backtest.as_ref().unwrap();
    assert_eq!(bt.equity_curve.len(), TEST_DAYS);
    assert_eq!(bt.benchmark_curve.len(), TEST_DAYS);
    assert!(bt.metrics.max_drawdown <= 0.0);
    assert!(bt.metrics.volatility >= 0.0);

    // A failing sibling does not affect Core.
    let impossible = report.outcome("Impossible").unwrap();
    assert!(impossible.portfolio.is_none());
    let failure = impossible.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Selection);
    assert_eq!(failure.kind, "constraint_violation");
    assert_eq!(report.failed_profiles().len(), 1);
}

#[test]
fn test_k_sweep_on_synthetic_universe() {
    let (train, test) = synthetic_universe(7);
    let pipeline = Pipeline::new(run_config());
    let sweep = pipeline.k_sweep(&train, 2..=6).unwrap();

    assert_eq!(sweep.iter().map(|p| p.k).collect::<Vec<_>>(), vec![2, 3, 4, 5, 6]);
    for point in &sweep {
        assert!(point.inertia >= 0.0);
        assert!(point.silhouette.map_or(true, |s| (-1.0..=1.0).contains(&s)));
    }
    assert!(best_k(&sweep).is_some());

    // The configured K reproduces the segmentation's inertia.
    let k = pipeline.config().clustering.n_clusters;
    let input = PipelineInput::from_series(train, test, "SPY").unwrap();
    let report = pipeline.run(&input).unwrap();
    let point = sweep.iter().find(|p| p.k == k).unwrap();
    assert_eq!(point.inertia, report.segmentation.diagnostics.inertia);
}

#[test]
fn test_pipeline_is_deterministic() {
    let (train, test) = synthetic_universe(11);
    let input = PipelineInput::from_series(train, test, "SPY").unwrap();
    let pipeline = Pipeline::new(run_config());

    let first = pipeline.run(&input).unwrap();
    let second = pipeline.run(&input).unwrap();

    assert_eq!(first.features, second.features);
    assert_eq!(first.outliers, second.outliers);
    assert_eq!(first.segmentation, second.segmentation);
    assert_eq!(first.profiles, second.profiles);
    assert_eq!(first.metadata.config_hash, second.metadata.config_hash);
    assert_eq!(first.metadata.data_fingerprint, second.metadata.data_fingerprint);
    assert_ne!(first.metadata.run_id, second.metadata.run_id);
}

#[test]
fn test_backtest_gap_fails_only_the_backtest() {
    let (train, test) = synthetic_universe(3);
    let input = PipelineInput::from_series(train, test, "SPY").unwrap();
    let input = PipelineInput {
        test: vec![input.test_benchmark.clone()],
        ..input
    };
    let report = Pipeline::new(run_config()).run(&input).unwrap();

    let core = report.outcome("Core").unwrap();
    assert!(core.portfolio.is_some());
    assert!(core.backtest.is_none());
    let failure = core.failure.as_ref().unwrap();
    assert_eq!(failure.stage, Stage::Backtest);
    assert_eq!(failure.kind, "backtest_data_gap");
}

#[test]
fn test_too_few_clusters_is_fatal() {
    let (train, test) = synthetic_universe(5);
    let train: Vec<PriceSeries> = train.into_iter().take(4).collect();
    let input = PipelineInput::from_series(train, test, "SPY").unwrap();

    let mut config = run_config();
    config.outliers = OutlierConfig {
        min_samples: 1,
        ..Default::default()
    };
    let err = Pipeline::new(config).run(&input).unwrap_err();
    assert!(matches!(err, PipelineError::ClusteringDegenerate(_)));
}

// ============================================================================
// Stage checks through the public API
// ============================================================================

#[test]
fn test_injected_extreme_point_is_outlier() {
    let mut rng = StdRng::seed_from_u64(21);
    let mut rows: Vec<(String, FeatureVector)> = (0..40)
        .map(|i| {
            let id = format!("P{:02}", i);
            let v = vector(
                &id,
                &[
                    (Metric::ReturnAnnualized, rng.gen_range(0.0..0.2)),
                    (Metric::VolatilityAnnual, rng.gen_range(0.1..0.3)),
                    (Metric::Beta, rng.gen_range(0.5..1.5)),
                ],
            );
            (id, v)
        })
        .collect();
    rows.push((
        "ZZZ".to_string(),
        vector(
            "ZZZ",
            &[
                (Metric::ReturnAnnualized, 20.0),
                (Metric::VolatilityAnnual, 0.2),
                (Metric::Beta, 1.0),
            ],
        ),
    ));
    let matrix = FeatureMatrix::new(rows).unwrap();

    let outliers = OutlierDetector::new(OutlierConfig::default()).detect(&matrix).unwrap();
    assert!(outliers.is_outlier("ZZZ"));
    assert!(outliers.n_outliers() < matrix.len() / 2);
}

#[test]
fn test_single_doubling_asset() {
    let assets: BTreeMap<_, _> = [("X".to_string(), daily("X", &[20.0, 25.0, 18.0, 40.0]))]
        .into_iter()
        .collect();
    let bench = daily("SPY", &[100.0, 100.0, 100.0, 100.0]);
    let portfolio = Portfolio {
        profile: "Solo".to_string(),
        holdings: vec![Holding {
            asset_id: "X".to_string(),
            cluster_label: 0,
            score: 1.0,
            weight: 1.0,
        }],
        shortfalls: vec![],
    };

    let config = BacktestConfig::default();
    let cost = config.transaction_cost;
    let mut engine = BacktestEngine::new(config);
    let result = engine.run(&portfolio, &assets, &bench).unwrap();

    assert_eq!(engine.state(), BacktestState::Completed);
    assert!((result.metrics.total_return - (2.0 * (1.0 - cost) - 1.0)).abs() < 1e-12);
    assert_eq!(result.benchmark_metrics.total_return, 0.0);
    assert!(engine.run(&portfolio, &assets, &bench).is_err());
}
