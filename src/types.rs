//! Core data types shared by every pipeline stage.

use crate::error::{PipelineError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Asset identifier (ticker).
pub type AssetId = String;

/// Cluster label. Regular clusters are `0..K`; outliers carry [`OUTLIER_LABEL`].
pub type ClusterLabel = i32;

/// Sentinel label for assets flagged by the outlier detector.
pub const OUTLIER_LABEL: ClusterLabel = -1;

/// A single daily observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub adjusted_close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, adjusted_close: f64) -> Self {
        Self {
            date,
            adjusted_close,
        }
    }
}

/// Ordered daily price history for one asset.
///
/// Dates are strictly increasing and every price is finite and positive.
/// Both are checked once at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSeries {
    asset_id: AssetId,
    points: Vec<PricePoint>,
}

impl PriceSeries {
    /// Create a validated series.
    pub fn new(asset_id: impl Into<AssetId>, points: Vec<PricePoint>) -> Result<Self> {
        let asset_id = asset_id.into();

        for (i, point) in points.iter().enumerate() {
            if !point.adjusted_close.is_finite() || point.adjusted_close <= 0.0 {
                return Err(PipelineError::InvalidInput(format!(
                    "{}: non-positive or non-finite price {} on {}",
                    asset_id, point.adjusted_close, point.date
                )));
            }
            if i > 0 && point.date <= points[i - 1].date {
                return Err(PipelineError::InvalidInput(format!(
                    "{}: dates not strictly increasing at {}",
                    asset_id, point.date
                )));
            }
        }

        Ok(Self { asset_id, points })
    }

    /// Build a series from parallel date/price slices.
    pub fn from_pairs(
        asset_id: impl Into<AssetId>,
        pairs: impl IntoIterator<Item = (NaiveDate, f64)>,
    ) -> Result<Self> {
        let points = pairs
            .into_iter()
            .map(|(date, close)| PricePoint::new(date, close))
            .collect();
        Self::new(asset_id, points)
    }

    pub fn asset_id(&self) -> &str {
        &self.asset_id
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.points.iter().map(|p| p.date)
    }

    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.adjusted_close).collect()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Price on an exact date (binary search, dates are sorted).
    pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
        self.points
            .binary_search_by(|p| p.date.cmp(&date))
            .ok()
            .map(|i| self.points[i].adjusted_close)
    }

    /// Simple daily returns `P_t / P_{t-1} - 1`.
    pub fn returns(&self) -> Vec<f64> {
        self.points
            .windows(2)
            .map(|w| w[1].adjusted_close / w[0].adjusted_close - 1.0)
            .collect()
    }

    /// Daily returns keyed by the date of the later observation.
    pub fn dated_returns(&self) -> Vec<(NaiveDate, f64)> {
        self.points
            .windows(2)
            .map(|w| (w[1].date, w[1].adjusted_close / w[0].adjusted_close - 1.0))
            .collect()
    }
}

/// A point on an equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub value: f64,
    /// Drawdown from the running peak, as a non-positive fraction.
    pub drawdown: f64,
}

/// Stage of the pipeline an exclusion or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Universe,
    Features,
    Outliers,
    Segmentation,
    Selection,
    Backtest,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Universe => write!(f, "universe"),
            Stage::Features => write!(f, "features"),
            Stage::Outliers => write!(f, "outliers"),
            Stage::Segmentation => write!(f, "segmentation"),
            Stage::Selection => write!(f, "selection"),
            Stage::Backtest => write!(f, "backtest"),
        }
    }
}

/// An asset dropped from a run, with the stage and reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub asset_id: AssetId,
    pub stage: Stage,
    pub kind: String,
    pub reason: String,
}

impl Exclusion {
    pub fn new(asset_id: impl Into<AssetId>, stage: Stage, error: &PipelineError) -> Self {
        Self {
            asset_id: asset_id.into(),
            stage,
            kind: error.kind().to_string(),
            reason: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    #[test]
    fn test_series_validation() {
        assert!(PriceSeries::from_pairs("A", vec![(d(1), 10.0), (d(2), 11.0)]).is_ok());
        assert!(PriceSeries::from_pairs("A", vec![(d(2), 10.0), (d(2), 11.0)]).is_err());
        assert!(PriceSeries::from_pairs("A", vec![(d(2), 10.0), (d(1), 11.0)]).is_err());
        assert!(PriceSeries::from_pairs("A", vec![(d(1), f64::NAN)]).is_err());
        assert!(PriceSeries::from_pairs("A", vec![(d(1), 0.0)]).is_err());
    }

    #[test]
    fn test_returns() {
        let series =
            PriceSeries::from_pairs("A", vec![(d(1), 100.0), (d(2), 110.0), (d(3), 99.0)]).unwrap();
        let returns = series.returns();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
        assert_eq!(series.dated_returns()[1].0, d(3));
    }

    #[test]
    fn test_price_on() {
        let series = PriceSeries::from_pairs("A", vec![(d(1), 100.0), (d(3), 110.0)]).unwrap();
        assert_eq!(series.price_on(d(3)), Some(110.0));
        assert_eq!(series.price_on(d(2)), None);
    }
}
