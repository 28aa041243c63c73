//! Buy-and-hold backtest engine.
//!
//! A [`Portfolio`] is held with fixed weights over an out-of-sample window.
//! The benchmark's dates form the calendar; every selected asset must have a
//! price on each of them. A single round-trip transaction cost is taken from
//! the initial capital before allocation.

use crate::analytics::{
    rolling_metrics, BenchmarkMetrics, MonthlyReturn, PerformanceMetrics, RollingPoint,
};
use crate::error::{PipelineError, Result};
use crate::portfolio::Portfolio;
use crate::stats;
use crate::types::{AssetId, EquityPoint, PriceSeries};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info, warn};

/// Configuration for the backtest engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    /// Round-trip cost rate charged once at entry (0.001 = 10 bp).
    #[serde(default = "default_transaction_cost")]
    pub transaction_cost: f64,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    /// Daily returns per window of the rolling metrics.
    #[serde(default = "default_rolling_window")]
    pub rolling_window: usize,
}

fn default_initial_capital() -> f64 {
    10_000.0
}
fn default_transaction_cost() -> f64 {
    0.001
}
fn default_risk_free_rate() -> f64 {
    0.05
}
fn default_rolling_window() -> usize {
    21
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: default_initial_capital(),
            transaction_cost: default_transaction_cost(),
            risk_free_rate: default_risk_free_rate(),
            rolling_window: default_rolling_window(),
        }
    }
}

/// Lifecycle of a backtest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BacktestState {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for BacktestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BacktestState::NotStarted => "not_started",
            BacktestState::Running => "running",
            BacktestState::Completed => "completed",
            BacktestState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Value of one holding at the end of the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionValue {
    pub asset_id: AssetId,
    pub weight: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub final_value: f64,
}

/// Results from a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub profile: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    /// Capital left after the entry cost.
    pub invested_capital: f64,
    pub final_value: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub benchmark_curve: Vec<EquityPoint>,
    pub metrics: PerformanceMetrics,
    pub benchmark_metrics: PerformanceMetrics,
    /// Portfolio total return minus benchmark total return.
    pub excess_return: f64,
    pub comparison: Option<BenchmarkMetrics>,
    pub positions: Vec<PositionValue>,
    pub monthly_returns: Vec<MonthlyReturn>,
    /// Empty when the window is longer than the backtest.
    pub rolling: Vec<RollingPoint>,
}

/// Replays fixed-weight portfolios over held-out prices.
pub struct BacktestEngine {
    config: BacktestConfig,
    trading_days_per_year: usize,
    state: BacktestState,
}

impl BacktestEngine {
    pub fn new(config: BacktestConfig) -> Self {
        Self {
            config,
            trading_days_per_year: 252,
            state: BacktestState::NotStarted,
        }
    }

    pub fn with_trading_days(mut self, trading_days_per_year: usize) -> Self {
        self.trading_days_per_year = trading_days_per_year;
        self
    }

    pub fn state(&self) -> BacktestState {
        self.state
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Run the backtest. An engine runs once; a second call is rejected.
    pub fn run(
        &mut self,
        portfolio: &Portfolio,
        prices: &BTreeMap<AssetId, PriceSeries>,
        benchmark: &PriceSeries,
    ) -> Result<BacktestResult> {
        if self.state != BacktestState::NotStarted {
            return Err(PipelineError::InvalidInput(format!(
                "backtest engine already {}",
                self.state
            )));
        }
        self.state = BacktestState::Running;
        info!(
            "Backtesting {} ({} holdings) over {} benchmark days",
            portfolio.profile,
            portfolio.len(),
            benchmark.len()
        );

        match self.simulate(portfolio, prices, benchmark) {
            Ok(result) => {
                self.state = BacktestState::Completed;
                info!(
                    "Backtest {} completed: total return {:.2}%",
                    portfolio.profile,
                    result.metrics.total_return * 100.0
                );
                Ok(result)
            }
            Err(err) => {
                self.state = BacktestState::Failed;
                warn!("Backtest {} failed: {}", portfolio.profile, err);
                Err(err)
            }
        }
    }

    fn simulate(
        &self,
        portfolio: &Portfolio,
        prices: &BTreeMap<AssetId, PriceSeries>,
        benchmark: &PriceSeries,
    ) -> Result<BacktestResult> {
        let calendar: Vec<NaiveDate> = benchmark.dates().collect();
        let (start_date, end_date) = match (calendar.first(), calendar.last()) {
            (Some(s), Some(e)) if calendar.len() >= 2 => (*s, *e),
            _ => {
                return Err(PipelineError::BacktestDataGap {
                    asset: benchmark.asset_id().to_string(),
                    reason: format!(
                        "benchmark has {} observations, need at least 2",
                        calendar.len()
                    ),
                })
            }
        };
        if portfolio.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "portfolio {} has no holdings",
                portfolio.profile
            )));
        }

        // Aligned price paths, one row per holding.
        let mut paths: Vec<Vec<f64>> = Vec::with_capacity(portfolio.len());
        for holding in &portfolio.holdings {
            let series = prices.get(&holding.asset_id).ok_or_else(|| {
                PipelineError::BacktestDataGap {
                    asset: holding.asset_id.clone(),
                    reason: "no out-of-sample price series".to_string(),
                }
            })?;
            let mut path = Vec::with_capacity(calendar.len());
            for date in &calendar {
                let price = series.price_on(*date).ok_or_else(|| PipelineError::BacktestDataGap {
                    asset: holding.asset_id.clone(),
                    reason: format!("no price on benchmark date {}", date),
                })?;
                path.push(price);
            }
            paths.push(path);
        }

        let initial = self.config.initial_capital;
        let invested = initial * (1.0 - self.config.transaction_cost);
        debug!(
            "Entry cost {:.4} on capital {:.2}",
            initial - invested,
            initial
        );

        let values: Vec<f64> = (0..calendar.len())
            .map(|t| {
                invested
                    * portfolio
                        .holdings
                        .iter()
                        .zip(&paths)
                        .map(|(h, path)| h.weight * path[t] / path[0])
                        .sum::<f64>()
            })
            .collect();

        let bench_closes = benchmark.closes();
        let bench_values: Vec<f64> = bench_closes
            .iter()
            .map(|p| initial * p / bench_closes[0])
            .collect();

        let rf = self.config.risk_free_rate;
        let days = self.trading_days_per_year;
        let metrics = PerformanceMetrics::from_values(initial, &values, rf, days);
        let benchmark_metrics = PerformanceMetrics::from_values(initial, &bench_values, rf, days);
        let comparison = BenchmarkMetrics::calculate(
            benchmark.asset_id(),
            &PerformanceMetrics::extract_returns(&values),
            &PerformanceMetrics::extract_returns(&bench_values),
            rf,
            days,
        );

        let last = calendar.len() - 1;
        let positions = portfolio
            .holdings
            .iter()
            .zip(&paths)
            .map(|(h, path)| PositionValue {
                asset_id: h.asset_id.clone(),
                weight: h.weight,
                entry_price: path[0],
                exit_price: path[last],
                final_value: invested * h.weight * path[last] / path[0],
            })
            .collect();

        let excess_return = metrics.total_return - benchmark_metrics.total_return;
        let equity = equity_curve(&calendar, &values);
        let monthly_returns = PerformanceMetrics::monthly_returns(&equity);
        let rolling = rolling_metrics(&equity, self.config.rolling_window, rf, days);
        Ok(BacktestResult {
            profile: portfolio.profile.clone(),
            start_date,
            end_date,
            initial_capital: initial,
            invested_capital: invested,
            final_value: values[last],
            equity_curve: equity,
            benchmark_curve: equity_curve(&calendar, &bench_values),
            metrics,
            benchmark_metrics,
            excess_return,
            comparison,
            positions,
            monthly_returns,
            rolling,
        })
    }
}

fn equity_curve(dates: &[NaiveDate], values: &[f64]) -> Vec<EquityPoint> {
    dates
        .iter()
        .zip(values)
        .zip(stats::drawdown_series(values))
        .map(|((date, value), drawdown)| EquityPoint {
            date: *date,
            value: *value,
            drawdown,
        })
        .collect()
}
