//! Performance analytics and reporting.

use crate::clustering::{best_k, KSweepPoint, Segmentation};
use crate::engine::BacktestResult;
use crate::features::Metric;
use crate::pipeline::{ProfileOutcome, RunReport};
use crate::profiles::RiskProfile;
use crate::stats;
use crate::types::{EquityPoint, Exclusion};
use chrono::{Datelike, NaiveDate};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Risk/return figures of one value curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Terminal value over the starting capital, minus one.
    pub total_return: f64,
    /// Mean daily return compounded over a trading year.
    pub annualized_return: f64,
    pub volatility: f64,
    /// `None` when volatility is exactly zero.
    pub sharpe_ratio: Option<f64>,
    /// `None` when downside deviation is exactly zero.
    pub sortino_ratio: Option<f64>,
    /// `None` when there is no drawdown.
    pub calmar_ratio: Option<f64>,
    pub max_drawdown: f64,
    /// Share of days with a positive return.
    pub win_rate: f64,
    pub n_observations: usize,
}

impl PerformanceMetrics {
    /// Metrics of a value curve that started from `initial_value`.
    ///
    /// `initial_value` may differ from `values[0]` when an entry cost was
    /// charged before the first observation.
    pub fn from_values(
        initial_value: f64,
        values: &[f64],
        risk_free_rate: f64,
        trading_days_per_year: usize,
    ) -> Self {
        let periods = trading_days_per_year as f64;
        let returns = Self::extract_returns(values);

        let final_value = values.last().copied().unwrap_or(initial_value);
        let total_return = final_value / initial_value - 1.0;

        let mean = stats::mean(&returns).unwrap_or(0.0);
        let annualized_return = stats::annualize_mean_return(mean, periods);
        let volatility = stats::sample_std_dev(&returns).unwrap_or(0.0) * periods.sqrt();

        let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside = stats::sample_std_dev(&negative).unwrap_or(0.0) * periods.sqrt();
        let max_drawdown = stats::max_drawdown(values);

        let excess = annualized_return - risk_free_rate;
        let win_rate = if returns.is_empty() {
            0.0
        } else {
            returns.iter().filter(|r| **r > 0.0).count() as f64 / returns.len() as f64
        };

        Self {
            total_return,
            annualized_return,
            volatility,
            sharpe_ratio: stats::ratio(excess, volatility).ok(),
            sortino_ratio: stats::ratio(excess, downside).ok(),
            calmar_ratio: stats::ratio(annualized_return, max_drawdown.abs()).ok(),
            max_drawdown,
            win_rate,
            n_observations: values.len(),
        }
    }

    /// Simple period returns of a value series.
    pub fn extract_returns(values: &[f64]) -> Vec<f64> {
        values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
    }

    /// Month-over-month returns of a dated curve.
    ///
    /// Each calendar month is represented by its last value. The first month
    /// has no predecessor and yields no return.
    pub fn monthly_returns(curve: &[EquityPoint]) -> Vec<MonthlyReturn> {
        let mut month_ends: Vec<(i32, u32, f64)> = Vec::new();
        for point in curve {
            let (year, month) = (point.date.year(), point.date.month());
            match month_ends.last_mut() {
                Some(last) if last.0 == year && last.1 == month => last.2 = point.value,
                _ => month_ends.push((year, month, point.value)),
            }
        }

        month_ends
            .windows(2)
            .map(|w| MonthlyReturn {
                year: w[1].0,
                month: w[1].1,
                month_end_value: w[1].2,
                period_return: w[1].2 / w[0].2 - 1.0,
            })
            .collect()
    }
}

/// Return of one calendar month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub month_end_value: f64,
    /// Month-end value over the previous month-end value, minus one.
    pub period_return: f64,
}

/// Trailing-window figures ending on one date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingPoint {
    pub date: NaiveDate,
    /// Mean daily return over the window, compounded over a trading year.
    pub annualized_return: f64,
    pub volatility: f64,
    /// `None` when the window's volatility is exactly zero.
    pub sharpe_ratio: Option<f64>,
    /// Value against the highest value inside the window.
    pub drawdown: f64,
}

/// Rolling return, volatility, Sharpe and drawdown over `window` daily
/// returns.
///
/// The first point lands on the date that completes the first full window,
/// so a curve of `n` values gives `n - window` points. A window shorter than
/// two returns gives none.
pub fn rolling_metrics(
    curve: &[EquityPoint],
    window: usize,
    risk_free_rate: f64,
    trading_days_per_year: usize,
) -> Vec<RollingPoint> {
    if window < 2 {
        return Vec::new();
    }
    let periods = trading_days_per_year as f64;
    let values: Vec<f64> = curve.iter().map(|p| p.value).collect();
    let returns = PerformanceMetrics::extract_returns(&values);

    // returns[j] is the move into values[j + 1].
    returns
        .windows(window)
        .enumerate()
        .map(|(start, w)| {
            let end = start + window;
            let mean = stats::mean(w).unwrap_or(0.0);
            let annualized_return = stats::annualize_mean_return(mean, periods);
            let volatility = stats::sample_std_dev(w).unwrap_or(0.0) * periods.sqrt();
            let peak = values[end + 1 - window..=end]
                .iter()
                .copied()
                .fold(f64::NEG_INFINITY, f64::max);
            RollingPoint {
                date: curve[end].date,
                annualized_return,
                volatility,
                sharpe_ratio: stats::ratio(annualized_return - risk_free_rate, volatility).ok(),
                drawdown: values[end] / peak - 1.0,
            }
        })
        .collect()
}

/// Benchmark comparison metrics.
/// These metrics compare portfolio performance against a benchmark index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
    /// Benchmark name (e.g., "SPY").
    pub benchmark_name: String,
    /// Jensen's alpha, annualized.
    pub alpha: f64,
    /// Sensitivity to benchmark moves.
    pub beta: f64,
    /// Annualized standard deviation of daily excess returns.
    pub tracking_error: f64,
    /// Annualized mean excess return per unit of tracking error.
    pub information_ratio: Option<f64>,
    pub correlation: Option<f64>,
    /// Portfolio gains over benchmark gains on up days.
    pub up_capture: Option<f64>,
    /// Portfolio losses over benchmark losses on down days.
    pub down_capture: Option<f64>,
}

impl BenchmarkMetrics {
    /// Calculate comparison metrics from aligned daily return series.
    ///
    /// Returns `None` if the series are empty, differ in length, or the
    /// benchmark has zero variance.
    pub fn calculate(
        benchmark_name: impl Into<String>,
        portfolio_returns: &[f64],
        benchmark_returns: &[f64],
        risk_free_rate: f64,
        trading_days_per_year: usize,
    ) -> Option<Self> {
        if portfolio_returns.len() < 2 || portfolio_returns.len() != benchmark_returns.len() {
            return None;
        }
        let periods = trading_days_per_year as f64;

        let fit = stats::linear_regression(benchmark_returns, portfolio_returns);
        let beta = match &fit {
            Ok(f) => f.slope,
            Err(_) => return None,
        };
        let correlation = fit.ok().map(|f| f.correlation);

        // Alpha = (Rp - Rf) - Beta * (Rb - Rf)
        let port_mean = stats::mean(portfolio_returns)?;
        let bench_mean = stats::mean(benchmark_returns)?;
        let port_annual = stats::annualize_mean_return(port_mean, periods);
        let bench_annual = stats::annualize_mean_return(bench_mean, periods);
        let alpha = (port_annual - risk_free_rate) - beta * (bench_annual - risk_free_rate);

        let excess: Vec<f64> = portfolio_returns
            .iter()
            .zip(benchmark_returns)
            .map(|(p, b)| p - b)
            .collect();
        let tracking_error = stats::std_dev(&excess)? * periods.sqrt();
        let information_ratio =
            stats::ratio(stats::mean(&excess)? * periods, tracking_error).ok();

        let (up_capture, down_capture) =
            Self::calculate_capture_ratios(portfolio_returns, benchmark_returns);

        Some(Self {
            benchmark_name: benchmark_name.into(),
            alpha,
            beta,
            tracking_error,
            information_ratio,
            correlation,
            up_capture,
            down_capture,
        })
    }

    /// Calculate upside and downside capture ratios.
    fn calculate_capture_ratios(
        portfolio_returns: &[f64],
        benchmark_returns: &[f64],
    ) -> (Option<f64>, Option<f64>) {
        let capture = |keep: fn(f64) -> bool| {
            let (port, bench) = portfolio_returns
                .iter()
                .zip(benchmark_returns)
                .filter(|(_, b)| keep(**b))
                .fold((0.0, 0.0), |(p, b), (pr, br)| (p + pr, b + br));
            stats::ratio(port, bench).ok()
        };
        (capture(|b| b > 0.0), capture(|b| b < 0.0))
    }
}

fn fmt_pct(value: f64) -> String {
    format!("{:.2}", value * 100.0)
}

fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.2}", v))
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print the headline view of a pipeline run.
    pub fn print_summary(report: &RunReport) {
        println!();
        println!("{}", "═".repeat(72).blue());
        println!("{}", " SEGMENTATION & PORTFOLIO RESULTS ".bold().blue());
        println!("{}", "═".repeat(72).blue());
        println!();

        println!("{}", "Run".bold().underline());
        println!("  Run ID:          {}", report.metadata.run_id);
        println!(
            "  Generated:       {}",
            report.metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        println!("  Universe:        {} assets", report.universe_size);
        println!("  Featured:        {} assets", report.features.len());
        println!("  Excluded:        {} assets", report.exclusions.len());
        println!();

        Self::print_segments(&report.segmentation);
        Self::print_profile_table(&report.profiles);

        if !report.exclusions.is_empty() {
            Self::print_exclusions(&report.exclusions);
        }
        println!("{}", "═".repeat(72).blue());
    }

    /// Print diagnostics and per-cluster means.
    pub fn print_segments(segmentation: &Segmentation) {
        let d = &segmentation.diagnostics;
        println!("{}", "Segmentation".bold().underline());
        println!("  Silhouette:      {:>10.4}", d.silhouette);
        println!("  Davies-Bouldin:  {:>10}", fmt_opt(d.davies_bouldin));
        println!("  Inertia:         {:>10.4}", d.inertia);
        println!(
            "  PCA variance:    {:>9.1}% / {:.1}%",
            d.explained_variance[0] * 100.0,
            d.explained_variance[1] * 100.0
        );
        println!(
            "  Outliers:        {:>10}  ({:.1}%, eps {:.4})",
            d.n_outliers,
            d.outlier_fraction * 100.0,
            d.outlier_eps
        );
        println!();

        let mut builder = Builder::new();
        builder.push_record([
            "Cluster", "Assets", "Return %", "Vol %", "Sharpe", "Beta", "Max DD %",
        ]);
        for s in &segmentation.summaries {
            let mean = |m: Metric| s.mean_of(m).unwrap_or(0.0);
            builder.push_record([
                s.label.to_string(),
                s.count.to_string(),
                fmt_pct(mean(Metric::ReturnAnnualized)),
                fmt_pct(mean(Metric::VolatilityAnnual)),
                format!("{:.2}", mean(Metric::SharpeRatio)),
                format!("{:.2}", mean(Metric::Beta)),
                fmt_pct(mean(Metric::MaxDrawdown)),
            ]);
        }
        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
        println!();
    }

    /// Print one row per profile with its backtest headline or failure.
    pub fn print_profile_table(outcomes: &[ProfileOutcome]) {
        let mut builder = Builder::new();
        builder.push_record([
            "Profile",
            "Assets",
            "Return %",
            "Annual %",
            "Vol %",
            "Sharpe",
            "Max DD %",
            "vs Bench %",
            "Status",
        ]);

        for outcome in outcomes {
            let assets = outcome
                .portfolio
                .as_ref()
                .map_or_else(|| "-".to_string(), |p| p.len().to_string());
            match (&outcome.backtest, &outcome.failure) {
                (Some(bt), _) => builder.push_record([
                    outcome.profile.clone(),
                    assets,
                    fmt_pct(bt.metrics.total_return),
                    fmt_pct(bt.metrics.annualized_return),
                    fmt_pct(bt.metrics.volatility),
                    fmt_opt(bt.metrics.sharpe_ratio),
                    fmt_pct(bt.metrics.max_drawdown),
                    fmt_pct(bt.excess_return),
                    "ok".green().to_string(),
                ]),
                (None, failure) => {
                    let status = failure.as_ref().map_or_else(
                        || "skipped".to_string(),
                        |f| format!("{}: {}", f.stage, f.kind),
                    );
                    builder.push_record([
                        outcome.profile.clone(),
                        assets,
                        "-".into(),
                        "-".into(),
                        "-".into(),
                        "-".into(),
                        "-".into(),
                        "-".into(),
                        status.red().to_string(),
                    ])
                }
            }
        }

        println!("{}", "Profiles".bold().underline());
        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
        println!();

        for outcome in outcomes {
            if let Some(f) = &outcome.failure {
                println!("  {} {}: {}", "!".red(), outcome.profile, f.reason);
            }
        }
    }

    /// Print a detailed report of a single backtest.
    pub fn print_backtest(result: &BacktestResult) {
        let m = &result.metrics;
        println!();
        println!("{}", format!("Backtest: {}", result.profile).bold().underline());
        println!("  Period:          {} to {}", result.start_date, result.end_date);
        println!("  Observations:    {:>12}", m.n_observations);
        println!("  Initial Capital: ${:>12.2}", result.initial_capital);
        println!("  Invested:        ${:>12.2}", result.invested_capital);
        println!(
            "  Final Value:     ${:>12.2}  {}",
            result.final_value,
            Self::format_pct_change(m.total_return)
        );
        println!("  Annual Return:   {:>12}%", fmt_pct(m.annualized_return));
        println!("  Volatility:      {:>12}%", fmt_pct(m.volatility));
        println!("  Max Drawdown:    {:>12}%", fmt_pct(m.max_drawdown));
        println!("  Sharpe Ratio:    {:>12}", fmt_opt(m.sharpe_ratio));
        println!("  Sortino Ratio:   {:>12}", fmt_opt(m.sortino_ratio));
        println!("  Calmar Ratio:    {:>12}", fmt_opt(m.calmar_ratio));
        println!("  Win Rate:        {:>12}%", fmt_pct(m.win_rate));
        println!();
        println!(
            "  Benchmark:       {:>12}%   Excess: {}%",
            fmt_pct(result.benchmark_metrics.total_return),
            fmt_pct(result.excess_return)
        );
        if let Some(bm) = &result.comparison {
            println!("  Alpha:           {:>12}%", fmt_pct(bm.alpha));
            println!("  Beta:            {:>12.2}", bm.beta);
            println!("  Tracking Error:  {:>12}%", fmt_pct(bm.tracking_error));
            println!("  Information:     {:>12}", fmt_opt(bm.information_ratio));
        }
        if !result.monthly_returns.is_empty() {
            println!();
            for m in &result.monthly_returns {
                println!(
                    "  {}-{:02}:         {}",
                    m.year,
                    m.month,
                    Self::format_pct_change(m.period_return)
                );
            }
        }
        println!();
    }

    /// Print inertia and silhouette for each candidate K, marking the
    /// highest silhouette.
    pub fn print_k_sweep(sweep: &[KSweepPoint]) {
        let best = best_k(sweep);
        let mut builder = Builder::new();
        builder.push_record(["K", "Inertia", "Silhouette", ""]);
        for point in sweep {
            let marker = if Some(point.k) == best { "*" } else { "" };
            builder.push_record([
                point.k.to_string(),
                format!("{:.3}", point.inertia),
                fmt_opt(point.silhouette),
                marker.to_string(),
            ]);
        }
        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
    }

    pub fn print_exclusions(exclusions: &[Exclusion]) {
        let mut builder = Builder::new();
        builder.push_record(["Asset", "Stage", "Kind", "Reason"]);
        for e in exclusions {
            builder.push_record([
                e.asset_id.clone(),
                e.stage.to_string(),
                e.kind.clone(),
                e.reason.clone(),
            ]);
        }
        println!("{}", "Excluded assets".bold().underline());
        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
        println!();
    }

    pub fn print_profiles(profiles: &[RiskProfile]) {
        let mut builder = Builder::new();
        builder.push_record(["Profile", "Distribution", "Beta", "Weights (r/m/s/b)"]);
        for p in profiles {
            let distribution = p
                .distribution
                .iter()
                .map(|t| format!("{}:{}", t.cluster, t.count))
                .collect::<Vec<_>>()
                .join(" ");
            let weights = p.weights.map_or_else(
                || "default".to_string(),
                |w| format!("{:.2}/{:.2}/{:.2}/{:.2}", w.ret, w.momentum, w.sharpe, w.beta),
            );
            builder.push_record([
                p.name.clone(),
                distribution,
                format!("{:?}", p.beta_preference).to_lowercase(),
                weights,
            ]);
        }
        let table = builder.build().with(Style::rounded()).to_string();
        println!("{}", table);
    }

    /// Format a fractional change with color.
    fn format_pct_change(value: f64) -> String {
        if value >= 0.0 {
            format!("(+{}%)", fmt_pct(value)).green().to_string()
        } else {
            format!("({}%)", fmt_pct(value)).red().to_string()
        }
    }

    /// Export any result record as pretty JSON.
    pub fn to_json<T: Serialize>(value: &T) -> String {
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
    }
}
