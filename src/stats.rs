//! Statistical utilities shared by feature building, clustering and backtesting.
//!
//! Every function that can divide by zero returns a [`MetricError`] instead of
//! letting an Inf or NaN escape into downstream numbers.

use thiserror::Error;

/// Failure of a single numeric computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MetricError {
    /// The denominator of a ratio is exactly zero.
    #[error("division undefined: denominator is zero")]
    DivisionUndefined,
    #[error("result is not finite")]
    NonFinite,
    #[error("not enough observations: need {required}, got {available}")]
    TooFewObservations { required: usize, available: usize },
}

/// Arithmetic mean.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population variance (n denominator).
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Population standard deviation.
pub fn std_dev(values: &[f64]) -> Option<f64> {
    variance(values).map(f64::sqrt)
}

/// Sample variance (n-1 denominator).
pub fn sample_variance(values: &[f64]) -> Option<f64> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64)
}

/// Sample standard deviation.
pub fn sample_std_dev(values: &[f64]) -> Option<f64> {
    sample_variance(values).map(f64::sqrt)
}

/// Percentile with linear interpolation between closest ranks.
///
/// `pct` is expressed on the 0-100 scale.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=100.0).contains(&pct) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

/// Divide, refusing a zero denominator or a non-finite quotient.
pub fn ratio(numerator: f64, denominator: f64) -> Result<f64, MetricError> {
    if denominator == 0.0 {
        return Err(MetricError::DivisionUndefined);
    }
    finite(numerator / denominator)
}

/// Pass a value through only when it is finite.
pub fn finite(value: f64) -> Result<f64, MetricError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(MetricError::NonFinite)
    }
}

/// Compound a mean periodic return over `periods` periods.
pub fn annualize_mean_return(mean_return: f64, periods: f64) -> f64 {
    (1.0 + mean_return).powf(periods) - 1.0
}

/// Drawdown of each value from its running peak (values are non-positive).
pub fn drawdown_series(values: &[f64]) -> Vec<f64> {
    let mut peak = f64::MIN;
    values
        .iter()
        .map(|&v| {
            peak = peak.max(v);
            v / peak - 1.0
        })
        .collect()
}

/// Most negative drawdown over the series; 0.0 for a monotone or empty series.
pub fn max_drawdown(values: &[f64]) -> f64 {
    drawdown_series(values)
        .into_iter()
        .fold(0.0_f64, f64::min)
}

/// Third standardized moment (population).
pub fn skewness(values: &[f64]) -> Result<f64, MetricError> {
    let m = mean(values).ok_or(MetricError::TooFewObservations {
        required: 1,
        available: 0,
    })?;
    let n = values.len() as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    ratio(m3, m2.powf(1.5))
}

/// Fourth standardized moment minus 3 (population excess kurtosis).
pub fn excess_kurtosis(values: &[f64]) -> Result<f64, MetricError> {
    let m = mean(values).ok_or(MetricError::TooFewObservations {
        required: 1,
        available: 0,
    })?;
    let n = values.len() as f64;
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n;
    ratio(m4, m2 * m2).map(|k| k - 3.0)
}

/// Ordinary least-squares fit of `y` on `x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub correlation: f64,
}

/// Regress `y` on `x`. Both slices must have the same length.
pub fn linear_regression(x: &[f64], y: &[f64]) -> Result<LinearFit, MetricError> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Err(MetricError::TooFewObservations {
            required: 2,
            available: n,
        });
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut sxx = 0.0;
    let mut syy = 0.0;
    let mut sxy = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }

    let slope = ratio(sxy, sxx)?;
    let intercept = finite(mean_y - slope * mean_x)?;
    let correlation = ratio(sxy, (sxx * syy).sqrt())?;

    Ok(LinearFit {
        slope,
        intercept,
        r_squared: correlation * correlation,
        correlation,
    })
}

/// Min-max scale to [0, 1]. A constant column maps to 0.5.
pub fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let range = max - min;
    values
        .iter()
        .map(|&v| if range > 0.0 { (v - min) / range } else { 0.5 })
        .collect()
}

pub fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

pub fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    squared_distance(a, b).sqrt()
}
