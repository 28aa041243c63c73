//! Per-asset feature extraction.
//!
//! Turns a training-window [`PriceSeries`] plus the benchmark series into a
//! fixed-width [`FeatureVector`] of 21 metrics:
//!
//! - **Return**: total, annualized (compounded mean daily return), daily mean
//! - **Risk**: volatility, downside deviation, max drawdown, VaR, CVaR
//! - **Efficiency**: Sharpe, Sortino, Calmar
//! - **Market exposure**: beta, alpha, R², correlation with the benchmark
//! - **Distribution shape**: skewness, excess kurtosis, positive-day ratio, worst day
//! - **Momentum**: 6-month momentum, volatility of volatility
//!
//! An asset whose metrics cannot all be computed (too little history, a zero
//! denominator, a non-finite value) is excluded from the [`FeatureMatrix`] and
//! reported as an [`Exclusion`]. Nothing is zero-filled.
//!
//! # Example
//!
//! ```no_run
//! use clusterfolio::features::{FeatureBuilder, FeatureConfig};
//! # fn universe() -> (Vec<clusterfolio::PriceSeries>, clusterfolio::PriceSeries) { unimplemented!() }
//!
//! let (assets, benchmark) = universe();
//! let builder = FeatureBuilder::new(FeatureConfig::default());
//! let build = builder.build(&assets, &benchmark).unwrap();
//! println!("{} assets, {} excluded", build.matrix.len(), build.exclusions.len());
//! ```

use crate::error::{PipelineError, Result};
use crate::stats;
use crate::types::{AssetId, Exclusion, PriceSeries, Stage};
use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Number of metrics in a [`FeatureVector`].
pub const METRIC_COUNT: usize = 21;

/// A named feature. The discriminant is the column index in a [`FeatureVector`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    ReturnTotal,
    ReturnAnnualized,
    ReturnDailyMean,
    VolatilityAnnual,
    DownsideDeviation,
    MaxDrawdown,
    #[serde(rename = "var_95")]
    Var95,
    #[serde(rename = "cvar_95")]
    Cvar95,
    SharpeRatio,
    SortinoRatio,
    CalmarRatio,
    Beta,
    Alpha,
    RSquared,
    CorrelationBenchmark,
    Skewness,
    Kurtosis,
    PositiveReturnRatio,
    WorstDay,
    #[serde(rename = "momentum_6m")]
    Momentum6m,
    VolatilityOfVolatility,
}

impl Metric {
    pub const ALL: [Metric; METRIC_COUNT] = [
        Metric::ReturnTotal,
        Metric::ReturnAnnualized,
        Metric::ReturnDailyMean,
        Metric::VolatilityAnnual,
        Metric::DownsideDeviation,
        Metric::MaxDrawdown,
        Metric::Var95,
        Metric::Cvar95,
        Metric::SharpeRatio,
        Metric::SortinoRatio,
        Metric::CalmarRatio,
        Metric::Beta,
        Metric::Alpha,
        Metric::RSquared,
        Metric::CorrelationBenchmark,
        Metric::Skewness,
        Metric::Kurtosis,
        Metric::PositiveReturnRatio,
        Metric::WorstDay,
        Metric::Momentum6m,
        Metric::VolatilityOfVolatility,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Serialized key of the metric.
    pub fn name(self) -> &'static str {
        match self {
            Metric::ReturnTotal => "return_total",
            Metric::ReturnAnnualized => "return_annualized",
            Metric::ReturnDailyMean => "return_daily_mean",
            Metric::VolatilityAnnual => "volatility_annual",
            Metric::DownsideDeviation => "downside_deviation",
            Metric::MaxDrawdown => "max_drawdown",
            Metric::Var95 => "var_95",
            Metric::Cvar95 => "cvar_95",
            Metric::SharpeRatio => "sharpe_ratio",
            Metric::SortinoRatio => "sortino_ratio",
            Metric::CalmarRatio => "calmar_ratio",
            Metric::Beta => "beta",
            Metric::Alpha => "alpha",
            Metric::RSquared => "r_squared",
            Metric::CorrelationBenchmark => "correlation_benchmark",
            Metric::Skewness => "skewness",
            Metric::Kurtosis => "kurtosis",
            Metric::PositiveReturnRatio => "positive_return_ratio",
            Metric::WorstDay => "worst_day",
            Metric::Momentum6m => "momentum_6m",
            Metric::VolatilityOfVolatility => "volatility_of_volatility",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for feature extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Periods used to annualize daily figures.
    #[serde(default = "default_trading_days")]
    pub trading_days_per_year: usize,
    /// Annual risk-free rate in the Sharpe and Sortino numerators.
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Tail probability for VaR/CVaR (0.05 = 95% confidence).
    #[serde(default = "default_confidence_level")]
    pub confidence_level: f64,
    /// Lookback, in observations, of the momentum metric.
    #[serde(default = "default_momentum_window")]
    pub momentum_window: usize,
    /// Rolling window of the short-horizon volatility series.
    #[serde(default = "default_vol_of_vol_window")]
    pub vol_of_vol_window: usize,
}

fn default_trading_days() -> usize {
    252
}
fn default_risk_free_rate() -> f64 {
    0.05
}
fn default_confidence_level() -> f64 {
    0.05
}
fn default_momentum_window() -> usize {
    126
}
fn default_vol_of_vol_window() -> usize {
    21
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            trading_days_per_year: default_trading_days(),
            risk_free_rate: default_risk_free_rate(),
            confidence_level: default_confidence_level(),
            momentum_window: default_momentum_window(),
            vol_of_vol_window: default_vol_of_vol_window(),
        }
    }
}

impl FeatureConfig {
    /// Minimum number of prices an asset needs for every metric.
    pub fn min_observations(&self) -> usize {
        (self.momentum_window + 1).max(self.vol_of_vol_window + 2)
    }
}

/// The 21 metrics of one asset. Every value is finite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f64; METRIC_COUNT],
}

impl FeatureVector {
    /// Build from raw values in [`Metric::ALL`] order, rejecting non-finite entries.
    pub fn from_values(asset: &str, values: [f64; METRIC_COUNT]) -> Result<Self> {
        for metric in Metric::ALL {
            if !values[metric.index()].is_finite() {
                return Err(PipelineError::DataQuality {
                    asset: asset.to_string(),
                    metric: metric.name().to_string(),
                    reason: "result is not finite".to_string(),
                });
            }
        }
        Ok(Self { values })
    }

    pub fn get(&self, metric: Metric) -> f64 {
        self.values[metric.index()]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn to_map(&self) -> BTreeMap<&'static str, f64> {
        Metric::ALL
            .iter()
            .map(|m| (m.name(), self.values[m.index()]))
            .collect()
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(METRIC_COUNT))?;
        for metric in Metric::ALL {
            map.serialize_entry(metric.name(), &self.values[metric.index()])?;
        }
        map.end()
    }
}

/// Feature vectors of a universe, ordered by asset id.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureMatrix {
    rows: Vec<(AssetId, FeatureVector)>,
}

impl FeatureMatrix {
    /// Build a matrix; rows are sorted by asset id and ids must be unique.
    pub fn new(mut rows: Vec<(AssetId, FeatureVector)>) -> Result<Self> {
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        if let Some(dup) = rows.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(PipelineError::InvalidInput(format!(
                "duplicate asset id in feature matrix: {}",
                dup[0].0
            )));
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[(AssetId, FeatureVector)] {
        &self.rows
    }

    pub fn asset_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|(id, _)| id.as_str())
    }

    pub fn get(&self, asset_id: &str) -> Option<&FeatureVector> {
        self.rows
            .binary_search_by(|(id, _)| id.as_str().cmp(asset_id))
            .ok()
            .map(|i| &self.rows[i].1)
    }

    /// Values of one metric across all assets, in row order.
    pub fn column(&self, metric: Metric) -> Vec<f64> {
        self.rows.iter().map(|(_, v)| v.get(metric)).collect()
    }

    /// Dense row-major copy of the numeric values.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|(_, v)| v.as_slice().to_vec()).collect()
    }

    /// Matrix restricted to the assets accepted by `keep`.
    pub fn filter<F>(&self, mut keep: F) -> FeatureMatrix
    where
        F: FnMut(&str) -> bool,
    {
        FeatureMatrix {
            rows: self
                .rows
                .iter()
                .filter(|(id, _)| keep(id))
                .cloned()
                .collect(),
        }
    }
}

/// Output of [`FeatureBuilder::build`].
#[derive(Debug, Clone, Serialize)]
pub struct FeatureBuild {
    pub matrix: FeatureMatrix,
    pub exclusions: Vec<Exclusion>,
}

/// Computes feature vectors from price histories.
pub struct FeatureBuilder {
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Window lengths no price series can satisfy.
    fn check_windows(&self) -> Result<()> {
        let cfg = &self.config;
        if cfg.momentum_window == 0 || cfg.vol_of_vol_window < 2 {
            return Err(PipelineError::ConfigError(format!(
                "momentum_window must be >= 1 and vol_of_vol_window >= 2, got {} and {}",
                cfg.momentum_window, cfg.vol_of_vol_window
            )));
        }
        Ok(())
    }

    /// Compute features for every asset, in parallel, and collect them in
    /// asset-id order. Failing assets are excluded with their reason; a bad
    /// window configuration fails the whole build.
    pub fn build(&self, universe: &[PriceSeries], benchmark: &PriceSeries) -> Result<FeatureBuild> {
        self.check_windows()?;
        info!("Computing features for {} assets", universe.len());

        let mut results: Vec<(AssetId, Result<FeatureVector>)> = universe
            .par_iter()
            .map(|series| (series.asset_id().to_string(), self.compute(series, benchmark)))
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        let mut rows = Vec::with_capacity(results.len());
        let mut exclusions = Vec::new();
        for (asset_id, result) in results {
            match result {
                Ok(vector) => rows.push((asset_id, vector)),
                Err(err) => {
                    warn!("Excluding {} from feature matrix: {}", asset_id, err);
                    exclusions.push(Exclusion::new(asset_id, Stage::Features, &err));
                }
            }
        }

        let matrix = FeatureMatrix::new(rows)?;
        info!(
            "Feature matrix built: {} assets, {} excluded",
            matrix.len(),
            exclusions.len()
        );
        Ok(FeatureBuild { matrix, exclusions })
    }

    /// Compute the feature vector of a single asset.
    pub fn compute(&self, series: &PriceSeries, benchmark: &PriceSeries) -> Result<FeatureVector> {
        let asset = series.asset_id();
        let cfg = &self.config;
        let periods = cfg.trading_days_per_year as f64;
        let prices = series.closes();

        self.check_windows()?;
        let required = cfg.momentum_window + 1;
        if prices.len() < required {
            return Err(PipelineError::InsufficientHistory {
                asset: asset.to_string(),
                metric: Metric::Momentum6m.name().to_string(),
                required,
                available: prices.len(),
            });
        }
        let required = cfg.vol_of_vol_window + 2;
        if prices.len() < required {
            return Err(PipelineError::InsufficientHistory {
                asset: asset.to_string(),
                metric: Metric::VolatilityOfVolatility.name().to_string(),
                required,
                available: prices.len(),
            });
        }

        let fail = |metric: Metric| {
            move |err: stats::MetricError| PipelineError::from_metric(asset, metric.name(), err)
        };
        let too_few = stats::MetricError::TooFewObservations {
            required: 2,
            available: prices.len().saturating_sub(1),
        };

        let returns = series.returns();
        let first = prices[0];
        let last = prices[prices.len() - 1];

        // Return
        let return_total = last / first - 1.0;
        let daily_mean = stats::mean(&returns)
            .ok_or(too_few.clone())
            .map_err(fail(Metric::ReturnDailyMean))?;
        let annualized = stats::annualize_mean_return(daily_mean, periods);

        // Risk
        let volatility = stats::sample_std_dev(&returns)
            .ok_or(too_few.clone())
            .map_err(fail(Metric::VolatilityAnnual))?
            * periods.sqrt();
        let downside = downside_deviation(&returns) * periods.sqrt();
        let max_drawdown = stats::max_drawdown(&prices);
        let var = stats::percentile(&returns, cfg.confidence_level * 100.0)
            .ok_or(too_few.clone())
            .map_err(fail(Metric::Var95))?;
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
        let cvar = stats::mean(&tail).ok_or(too_few.clone()).map_err(fail(Metric::Cvar95))?;

        // Efficiency
        let excess = annualized - cfg.risk_free_rate;
        let sharpe = stats::ratio(excess, volatility).map_err(fail(Metric::SharpeRatio))?;
        let sortino = stats::ratio(excess, downside).map_err(fail(Metric::SortinoRatio))?;
        let calmar =
            stats::ratio(annualized, max_drawdown.abs()).map_err(fail(Metric::CalmarRatio))?;

        // Market exposure
        let (asset_aligned, bench_aligned) = align_returns(series, benchmark);
        let fit = stats::linear_regression(&bench_aligned, &asset_aligned)
            .map_err(fail(Metric::Beta))?;
        debug!(
            "{}: beta {:.4} over {} overlapping days",
            asset,
            fit.slope,
            asset_aligned.len()
        );

        // Distribution shape
        let skewness = stats::skewness(&returns).map_err(fail(Metric::Skewness))?;
        let kurtosis = stats::excess_kurtosis(&returns).map_err(fail(Metric::Kurtosis))?;
        let positive_ratio =
            returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64;
        let worst_day = returns.iter().copied().fold(f64::INFINITY, f64::min);

        // Momentum
        let momentum = last / prices[prices.len() - 1 - cfg.momentum_window] - 1.0;
        let rolling_vol: Vec<f64> = returns
            .windows(cfg.vol_of_vol_window)
            .filter_map(stats::sample_std_dev)
            .map(|v| v * periods.sqrt())
            .collect();
        let vol_of_vol = stats::sample_std_dev(&rolling_vol)
            .ok_or(too_few)
            .map_err(fail(Metric::VolatilityOfVolatility))?;

        FeatureVector::from_values(
            asset,
            [
                return_total,
                annualized,
                daily_mean,
                volatility,
                downside,
                max_drawdown,
                var,
                cvar,
                sharpe,
                sortino,
                calmar,
                fit.slope,
                fit.intercept * periods,
                fit.r_squared,
                fit.correlation,
                skewness,
                kurtosis,
                positive_ratio,
                worst_day,
                momentum,
                vol_of_vol,
            ],
        )
    }
}

/// Sample standard deviation of the negative returns; 0 with fewer than two.
fn downside_deviation(returns: &[f64]) -> f64 {
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    stats::sample_std_dev(&negative).unwrap_or(0.0)
}

/// Asset and benchmark daily returns on the dates both series report.
fn align_returns(series: &PriceSeries, benchmark: &PriceSeries) -> (Vec<f64>, Vec<f64>) {
    let asset = series.dated_returns();
    let bench = benchmark.dated_returns();

    let mut x = Vec::new();
    let mut y = Vec::new();
    let (mut i, mut j) = (0, 0);
    while i < asset.len() && j < bench.len() {
        match asset[i].0.cmp(&bench[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                x.push(asset[i].1);
                y.push(bench[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    (x, y)
}
