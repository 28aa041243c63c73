//! Density-based outlier detection.
//!
//! Features are standardized on the input matrix, then every point's distance
//! to its `min_samples`-th nearest neighbour (the point itself counts as the
//! first) is computed. The neighbourhood radius `eps` is a percentile of that
//! distribution, so it follows the scale of the current universe.
//!
//! A point is a core point when at least `min_samples` points (itself
//! included) lie within `eps`. A point is an outlier when it is not a core
//! point and no core point lies within `eps` of it.

use crate::error::{PipelineError, Result};
use crate::features::FeatureMatrix;
use crate::scaler::StandardScaler;
use crate::stats;
use crate::types::AssetId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Parameters of the outlier scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierConfig {
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
    /// Percentile (0-100) of the k-distance distribution used as `eps`.
    #[serde(default = "default_eps_percentile")]
    pub eps_percentile: f64,
}

fn default_min_samples() -> usize {
    5
}
fn default_eps_percentile() -> f64 {
    90.0
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            min_samples: default_min_samples(),
            eps_percentile: default_eps_percentile(),
        }
    }
}

/// Result of an outlier scan, in feature-matrix row order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    /// Neighbourhood radius actually used.
    pub eps: f64,
    pub flags: Vec<(AssetId, bool)>,
}

impl OutlierReport {
    pub fn is_outlier(&self, asset_id: &str) -> bool {
        self.flags
            .iter()
            .any(|(id, flagged)| *flagged && id == asset_id)
    }

    pub fn outliers(&self) -> Vec<&str> {
        self.flags
            .iter()
            .filter(|(_, flagged)| *flagged)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn n_outliers(&self) -> usize {
        self.flags.iter().filter(|(_, flagged)| *flagged).count()
    }

    /// Share of scanned assets flagged, in [0, 1].
    pub fn outlier_fraction(&self) -> f64 {
        if self.flags.is_empty() {
            0.0
        } else {
            self.n_outliers() as f64 / self.flags.len() as f64
        }
    }
}

/// Flags atypical assets before segmentation.
pub struct OutlierDetector {
    config: OutlierConfig,
}

impl OutlierDetector {
    pub fn new(config: OutlierConfig) -> Self {
        Self { config }
    }

    pub fn detect(&self, matrix: &FeatureMatrix) -> Result<OutlierReport> {
        let min_samples = self.config.min_samples;
        let n = matrix.len();
        if min_samples == 0 {
            return Err(PipelineError::ConfigError(
                "outliers.min_samples must be at least 1".to_string(),
            ));
        }
        if n < min_samples {
            return Err(PipelineError::ClusteringDegenerate(format!(
                "outlier detection needs at least min_samples={} assets, got {}",
                min_samples, n
            )));
        }

        let (_, points) = StandardScaler::fit_transform(&matrix.to_rows());
        let distances = pairwise_distances(&points);

        let k_distances: Vec<f64> = distances
            .iter()
            .map(|row| {
                let mut sorted = row.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                sorted[min_samples - 1]
            })
            .collect();
        let eps = stats::percentile(&k_distances, self.config.eps_percentile).ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "eps percentile {} outside [0, 100]",
                self.config.eps_percentile
            ))
        })?;
        debug!("Outlier scan eps = {:.4} (p{})", eps, self.config.eps_percentile);

        let core: Vec<bool> = distances
            .iter()
            .map(|row| row.iter().filter(|d| **d <= eps).count() >= min_samples)
            .collect();

        let flags: Vec<(AssetId, bool)> = matrix
            .asset_ids()
            .enumerate()
            .map(|(i, id)| {
                let reachable = (0..n).any(|j| core[j] && distances[i][j] <= eps);
                (id.to_string(), !core[i] && !reachable)
            })
            .collect();

        let report = OutlierReport { eps, flags };
        info!(
            "Outlier scan: {} of {} assets flagged ({:.1}%)",
            report.n_outliers(),
            n,
            report.outlier_fraction() * 100.0
        );
        Ok(report)
    }
}

fn pairwise_distances(points: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut distances = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = stats::euclidean_distance(&points[i], &points[j]);
            distances[i][j] = d;
            distances[j][i] = d;
        }
    }
    distances
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureVector, METRIC_COUNT};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn matrix_with_extreme(seed: u64, n: usize) -> FeatureMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut rows = Vec::new();
        for i in 0..=n {
            let mut values = [0.5; METRIC_COUNT];
            values[0] = rng.gen::<f64>();
            values[1] = rng.gen::<f64>();
            values[2] = rng.gen::<f64>();
            if i == n {
                values[0] = 100.0;
            }
            let id = format!("A{:03}", i);
            rows.push((id.clone(), FeatureVector::from_values(&id, values).unwrap()));
        }
        FeatureMatrix::new(rows).unwrap()
    }

    #[test]
    fn test_extreme_point_flagged() {
        let matrix = matrix_with_extreme(7, 30);
        let report = OutlierDetector::new(OutlierConfig::default())
            .detect(&matrix)
            .unwrap();

        assert!(report.is_outlier("A030"), "extreme point not flagged");
        assert!(report.eps > 0.0);
        assert!(report.n_outliers() < 10);
    }

    #[test]
    fn test_identical_points_have_no_outliers() {
        let v = FeatureVector::from_values("X", [0.3; METRIC_COUNT]).unwrap();
        let rows = (0..6).map(|i| (format!("X{i}"), v)).collect();
        let matrix = FeatureMatrix::new(rows).unwrap();
        let report = OutlierDetector::new(OutlierConfig::default())
            .detect(&matrix)
            .unwrap();
        assert_eq!(report.n_outliers(), 0);
        assert_eq!(report.eps, 0.0);
    }

    #[test]
    fn test_too_few_assets() {
        let matrix = matrix_with_extreme(1, 3);
        let err = OutlierDetector::new(OutlierConfig::default())
            .detect(&matrix)
            .unwrap_err();
        assert!(matches!(err, PipelineError::ClusteringDegenerate(_)));
        assert_eq!(err.kind(), "clustering_degenerate");
        assert!(err.to_string().contains("outlier detection"));

        let zero = OutlierConfig {
            min_samples: 0,
            ..Default::default()
        };
        let err = OutlierDetector::new(zero).detect(&matrix).unwrap_err();
        assert!(matches!(err, PipelineError::ConfigError(_)));
    }
}
