//! Error types for the segmentation and backtesting pipeline.

use crate::stats::MetricError;
use thiserror::Error;

/// Main error type for the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A feature metric is NaN/Inf or its denominator is exactly zero.
    #[error("Data quality error for {asset}: {metric} {reason}")]
    DataQuality {
        asset: String,
        metric: String,
        reason: String,
    },

    /// Too few observations for a windowed metric.
    #[error("Insufficient history for {asset}: {metric} needs {required} observations, got {available}")]
    InsufficientHistory {
        asset: String,
        metric: String,
        required: usize,
        available: usize,
    },

    /// Too few assets to scan for outliers, or fewer than two populated
    /// clusters so the silhouette score is undefined.
    #[error("Degenerate clustering: {0}")]
    ClusteringDegenerate(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Out-of-sample prices missing or misaligned with the benchmark calendar.
    #[error("Backtest data gap for {asset}: {reason}")]
    BacktestDataGap { asset: String, reason: String },

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl PipelineError {
    /// Short machine-friendly tag used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::DataQuality { .. } => "data_quality",
            PipelineError::InsufficientHistory { .. } => "insufficient_history",
            PipelineError::ClusteringDegenerate(_) => "clustering_degenerate",
            PipelineError::ConstraintViolation(_) => "constraint_violation",
            PipelineError::BacktestDataGap { .. } => "backtest_data_gap",
            PipelineError::ConfigError(_) => "config",
            PipelineError::InvalidInput(_) => "invalid_input",
            PipelineError::CsvError(_)
            | PipelineError::IoError(_)
            | PipelineError::DateParseError(_)
            | PipelineError::JsonError(_)
            | PipelineError::TomlError(_) => "io",
        }
    }

    /// Attach asset and metric context to a numeric failure.
    pub fn from_metric(asset: &str, metric: &str, err: MetricError) -> Self {
        match err {
            MetricError::TooFewObservations {
                required,
                available,
            } => PipelineError::InsufficientHistory {
                asset: asset.to_string(),
                metric: metric.to_string(),
                required,
                available,
            },
            other => PipelineError::DataQuality {
                asset: asset.to_string(),
                metric: metric.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
