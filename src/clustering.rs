//! Asset segmentation.
//!
//! Non-outlier assets are standardized with their own scaler and partitioned
//! into a fixed number of clusters with seeded k-means (k-means++ seeding,
//! Lloyd iterations, best of `n_init` runs by inertia). Outliers keep the
//! sentinel label [`OUTLIER_LABEL`].
//!
//! Alongside the assignment the segmenter reports per-cluster summaries, a
//! silhouette score, the Davies-Bouldin index and a two-component PCA
//! projection. The projection is for display only.

use crate::error::{PipelineError, Result};
use crate::features::{FeatureMatrix, Metric};
use crate::outliers::OutlierReport;
use crate::scaler::StandardScaler;
use crate::stats;
use crate::types::{AssetId, ClusterLabel, OUTLIER_LABEL};
use nalgebra::{DMatrix, SymmetricEigen};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// Parameters of the k-means segmentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Number of clusters K.
    #[serde(default = "default_n_clusters")]
    pub n_clusters: usize,
    /// Independent initializations; the lowest-inertia run is kept.
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_n_clusters() -> usize {
    4
}
fn default_n_init() -> usize {
    10
}
fn default_max_iter() -> usize {
    300
}
fn default_seed() -> u64 {
    42
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            n_clusters: default_n_clusters(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
            seed: default_seed(),
        }
    }
}

/// Cluster label of every asset. Never mutated once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterAssignment {
    labels: BTreeMap<AssetId, ClusterLabel>,
}

impl ClusterAssignment {
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, ClusterLabel)>,
        S: Into<AssetId>,
    {
        Self {
            labels: pairs.into_iter().map(|(id, l)| (id.into(), l)).collect(),
        }
    }

    pub fn label(&self, asset_id: &str) -> Option<ClusterLabel> {
        self.labels.get(asset_id).copied()
    }

    pub fn is_outlier(&self, asset_id: &str) -> bool {
        self.label(asset_id) == Some(OUTLIER_LABEL)
    }

    /// Members of a cluster in asset-id order.
    pub fn members(&self, label: ClusterLabel) -> Vec<&str> {
        self.labels
            .iter()
            .filter(|(_, l)| **l == label)
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn cluster_sizes(&self) -> BTreeMap<ClusterLabel, usize> {
        let mut sizes = BTreeMap::new();
        for label in self.labels.values() {
            *sizes.entry(*label).or_insert(0) += 1;
        }
        sizes
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ClusterLabel)> + '_ {
        self.labels.iter().map(|(id, l)| (id.as_str(), *l))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Descriptive statistics of one cluster (the outlier segment included).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub label: ClusterLabel,
    pub count: usize,
    pub mean: BTreeMap<String, f64>,
    pub median: BTreeMap<String, f64>,
}

impl ClusterSummary {
    pub fn mean_of(&self, metric: Metric) -> Option<f64> {
        self.mean.get(metric.name()).copied()
    }

    pub fn median_of(&self, metric: Metric) -> Option<f64> {
        self.median.get(metric.name()).copied()
    }
}

/// Position of an asset on the first two principal components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedPoint {
    pub asset_id: AssetId,
    pub cluster_label: ClusterLabel,
    pub x: f64,
    pub y: f64,
}

/// Quality figures of a segmentation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringDiagnostics {
    pub silhouette: f64,
    /// Absent when two centroids coincide.
    pub davies_bouldin: Option<f64>,
    pub inertia: f64,
    pub iterations: usize,
    pub explained_variance: [f64; 2],
    pub cluster_sizes: BTreeMap<ClusterLabel, usize>,
    pub outlier_eps: f64,
    pub n_outliers: usize,
    pub outlier_fraction: f64,
}

/// Full output of [`Segmenter::segment`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    pub assignment: ClusterAssignment,
    pub summaries: Vec<ClusterSummary>,
    pub projection: Vec<ProjectedPoint>,
    pub diagnostics: ClusteringDiagnostics,
}

/// A fitted k-means model.
#[derive(Debug, Clone, PartialEq)]
pub struct KMeansFit {
    pub labels: Vec<usize>,
    pub centroids: Vec<Vec<f64>>,
    pub inertia: f64,
    pub iterations: usize,
}

/// Seeded k-means with multiple restarts.
pub struct KMeans {
    config: ClusteringConfig,
}

impl KMeans {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    /// Fit on already standardized points.
    ///
    /// Ties between equidistant centroids go to the lower index, and among
    /// equal-inertia runs the earliest is kept, so a fixed seed gives a fixed
    /// result.
    pub fn fit(&self, points: &[Vec<f64>]) -> Result<KMeansFit> {
        let k = self.config.n_clusters;
        if k == 0 || points.len() < k {
            return Err(PipelineError::ClusteringDegenerate(format!(
                "{} assets cannot form {} clusters",
                points.len(),
                k
            )));
        }

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut best: Option<KMeansFit> = None;
        for run in 0..self.config.n_init.max(1) {
            let centroids = kmeans_plus_plus(points, k, &mut rng);
            let fit = lloyd(points, centroids, self.config.max_iter);
            debug!(
                "k-means run {}: inertia {:.6} after {} iterations",
                run, fit.inertia, fit.iterations
            );
            if best.as_ref().map_or(true, |b| fit.inertia < b.inertia) {
                best = Some(fit);
            }
        }

        best.ok_or_else(|| PipelineError::ClusteringDegenerate("no k-means run completed".into()))
    }

    /// Fit once per candidate K with this model's seed and restarts, for an
    /// elbow or silhouette comparison. K values the points cannot support
    /// end the sweep.
    pub fn sweep(
        &self,
        points: &[Vec<f64>],
        k_range: RangeInclusive<usize>,
    ) -> Result<Vec<KSweepPoint>> {
        if *k_range.start() < 2 || k_range.is_empty() {
            return Err(PipelineError::ConfigError(format!(
                "k sweep needs a non-empty range starting at 2 or more, got {:?}",
                k_range
            )));
        }

        let mut sweep = Vec::new();
        for k in k_range.take_while(|&k| k <= points.len()) {
            let config = ClusteringConfig {
                n_clusters: k,
                ..self.config.clone()
            };
            let fit = KMeans::new(config).fit(points)?;
            let silhouette = silhouette_score(points, &fit.labels).ok();
            debug!("k = {}: inertia {:.4}, silhouette {:?}", k, fit.inertia, silhouette);
            sweep.push(KSweepPoint {
                k,
                inertia: fit.inertia,
                silhouette,
            });
        }

        if sweep.is_empty() {
            return Err(PipelineError::ClusteringDegenerate(format!(
                "{} assets are too few for any K in the sweep",
                points.len()
            )));
        }
        Ok(sweep)
    }
}

/// Fit quality of one candidate K.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KSweepPoint {
    pub k: usize,
    pub inertia: f64,
    /// `None` when the fit populated fewer than two clusters.
    pub silhouette: Option<f64>,
}

/// K with the highest silhouette; ties go to the smaller K.
pub fn best_k(sweep: &[KSweepPoint]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for point in sweep {
        if let Some(s) = point.silhouette {
            if best.map_or(true, |(_, b)| s > b) {
                best = Some((point.k, s));
            }
        }
    }
    best.map(|(k, _)| k)
}

fn kmeans_plus_plus(points: &[Vec<f64>], k: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
    let n = points.len();
    let mut centroids = vec![points[rng.gen_range(0..n)].clone()];

    while centroids.len() < k {
        let weights: Vec<f64> = points
            .iter()
            .map(|p| {
                centroids
                    .iter()
                    .map(|c| stats::squared_distance(p, c))
                    .fold(f64::INFINITY, f64::min)
            })
            .collect();
        let total: f64 = weights.iter().sum();

        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut acc = 0.0;
            weights
                .iter()
                .position(|w| {
                    acc += w;
                    acc > target
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centroids.push(points[next].clone());
    }
    centroids
}

fn nearest(point: &[f64], centroids: &[Vec<f64>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = stats::squared_distance(point, c);
        if d < best_dist {
            best = i;
            best_dist = d;
        }
    }
    best
}

fn assign(points: &[Vec<f64>], centroids: &[Vec<f64>]) -> Vec<usize> {
    points.iter().map(|p| nearest(p, centroids)).collect()
}

fn means(points: &[Vec<f64>], labels: &[usize], k: usize) -> (Vec<Vec<f64>>, Vec<usize>) {
    let width = points.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0; width]; k];
    let mut counts = vec![0usize; k];
    for (p, &l) in points.iter().zip(labels) {
        counts[l] += 1;
        for (s, v) in sums[l].iter_mut().zip(p) {
            *s += v;
        }
    }
    for (sum, &count) in sums.iter_mut().zip(&counts) {
        if count > 0 {
            sum.iter_mut().for_each(|s| *s /= count as f64);
        }
    }
    (sums, counts)
}

/// Recompute centroids; an empty cluster takes over the point farthest from
/// its own centroid among clusters with more than one member. With identical
/// points the next assignment pulls that point back, so the fit can still end
/// with a single populated cluster.
fn update(points: &[Vec<f64>], labels: &mut [usize], k: usize) -> Vec<Vec<f64>> {
    loop {
        let (centroids, counts) = means(points, labels, k);
        let Some(empty) = counts.iter().position(|&c| c == 0) else {
            return centroids;
        };

        let mut farthest = None;
        let mut farthest_dist = f64::NEG_INFINITY;
        for (i, p) in points.iter().enumerate() {
            if counts[labels[i]] < 2 {
                continue;
            }
            let d = stats::squared_distance(p, &centroids[labels[i]]);
            if d > farthest_dist {
                farthest = Some(i);
                farthest_dist = d;
            }
        }
        match farthest {
            Some(i) => labels[i] = empty,
            None => return centroids,
        }
    }
}

fn lloyd(points: &[Vec<f64>], mut centroids: Vec<Vec<f64>>, max_iter: usize) -> KMeansFit {
    let k = centroids.len();
    let mut labels = assign(points, &centroids);
    let mut iterations = 0;

    while iterations < max_iter {
        iterations += 1;
        centroids = update(points, &mut labels, k);
        let next = assign(points, &centroids);
        if next == labels {
            break;
        }
        labels = next;
    }

    let inertia = points
        .iter()
        .zip(&labels)
        .map(|(p, &l)| stats::squared_distance(p, &centroids[l]))
        .sum();

    KMeansFit {
        labels,
        centroids,
        inertia,
        iterations,
    }
}

/// Mean silhouette coefficient.
///
/// Members of singleton clusters score 0. Fails with
/// [`PipelineError::ClusteringDegenerate`] when fewer than two clusters are
/// populated.
pub fn silhouette_score(points: &[Vec<f64>], labels: &[usize]) -> Result<f64> {
    let mut sizes: BTreeMap<usize, usize> = BTreeMap::new();
    for &l in labels {
        *sizes.entry(l).or_insert(0) += 1;
    }
    if sizes.len() < 2 {
        return Err(PipelineError::ClusteringDegenerate(format!(
            "silhouette undefined: {} populated cluster(s)",
            sizes.len()
        )));
    }

    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        let own = labels[i];
        if sizes[&own] < 2 {
            continue;
        }
        let mut sums: BTreeMap<usize, f64> = BTreeMap::new();
        for (j, q) in points.iter().enumerate() {
            if i != j {
                *sums.entry(labels[j]).or_insert(0.0) += stats::euclidean_distance(p, q);
            }
        }
        let a = sums.get(&own).copied().unwrap_or(0.0) / (sizes[&own] - 1) as f64;
        let b = sums
            .iter()
            .filter(|(l, _)| **l != own)
            .map(|(l, s)| s / sizes[l] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 {
            total += (b - a) / denom;
        }
    }
    Ok(total / points.len() as f64)
}

/// Davies-Bouldin index over populated clusters; lower is better.
pub fn davies_bouldin_index(points: &[Vec<f64>], labels: &[usize], k: usize) -> Option<f64> {
    let (centroids, counts) = means(points, labels, k);
    let populated: Vec<usize> = (0..k).filter(|&c| counts[c] > 0).collect();
    if populated.len() < 2 {
        return None;
    }

    let mut scatter = vec![0.0; k];
    for (p, &l) in points.iter().zip(labels) {
        scatter[l] += stats::euclidean_distance(p, &centroids[l]);
    }
    for &c in &populated {
        scatter[c] /= counts[c] as f64;
    }

    let mut total = 0.0;
    for &i in &populated {
        let mut worst = f64::NEG_INFINITY;
        for &j in populated.iter().filter(|&&j| j != i) {
            let separation = stats::euclidean_distance(&centroids[i], &centroids[j]);
            let r = stats::ratio(scatter[i] + scatter[j], separation).ok()?;
            worst = worst.max(r);
        }
        total += worst;
    }
    Some(total / populated.len() as f64)
}

/// First two principal components of standardized points.
#[derive(Debug, Clone, PartialEq)]
pub struct Pca2 {
    means: Vec<f64>,
    components: [Vec<f64>; 2],
    /// Share of total variance on each component.
    pub explained_variance: [f64; 2],
}

impl Pca2 {
    pub fn fit(points: &[Vec<f64>]) -> Self {
        let n = points.len();
        let d = points.first().map_or(0, Vec::len);
        let mut means = vec![0.0; d];
        for p in points {
            for (m, v) in means.iter_mut().zip(p) {
                *m += v / n.max(1) as f64;
            }
        }

        let mut cov = DMatrix::<f64>::zeros(d, d);
        for p in points {
            for a in 0..d {
                for b in 0..d {
                    cov[(a, b)] += (p[a] - means[a]) * (p[b] - means[b]);
                }
            }
        }
        if n > 1 {
            cov /= (n - 1) as f64;
        }

        let eig = SymmetricEigen::new(cov);
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let total: f64 = eig.eigenvalues.iter().map(|v| v.max(0.0)).sum();

        let mut components = [vec![0.0; d], vec![0.0; d]];
        let mut explained_variance = [0.0; 2];
        for (slot, &idx) in order.iter().take(2).enumerate() {
            let mut v: Vec<f64> = eig.eigenvectors.column(idx).iter().copied().collect();
            // Sign convention: largest-magnitude loading is positive.
            let pivot = v
                .iter()
                .copied()
                .fold(0.0_f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                v.iter_mut().for_each(|x| *x = -*x);
            }
            components[slot] = v;
            if total > 0.0 {
                explained_variance[slot] = eig.eigenvalues[idx].max(0.0) / total;
            }
        }

        Self {
            means,
            components,
            explained_variance,
        }
    }

    pub fn project(&self, point: &[f64]) -> (f64, f64) {
        let dot = |c: &[f64]| {
            point
                .iter()
                .zip(&self.means)
                .zip(c)
                .map(|((x, m), w)| (x - m) * w)
                .sum::<f64>()
        };
        (dot(&self.components[0]), dot(&self.components[1]))
    }
}

/// Per-label count, mean and median of every metric.
pub fn summarize(matrix: &FeatureMatrix, assignment: &ClusterAssignment) -> Vec<ClusterSummary> {
    assignment
        .cluster_sizes()
        .into_keys()
        .map(|label| {
            let members = matrix.filter(|id| assignment.label(id) == Some(label));
            let mut mean = BTreeMap::new();
            let mut median = BTreeMap::new();
            for metric in Metric::ALL {
                let column = members.column(metric);
                if let Some(m) = stats::mean(&column) {
                    mean.insert(metric.name().to_string(), m);
                }
                if let Some(m) = stats::median(&column) {
                    median.insert(metric.name().to_string(), m);
                }
            }
            ClusterSummary {
                label,
                count: members.len(),
                mean,
                median,
            }
        })
        .collect()
}

/// Runs segmentation on the non-outlier part of a feature matrix.
pub struct Segmenter {
    config: ClusteringConfig,
}

impl Segmenter {
    pub fn new(config: ClusteringConfig) -> Self {
        Self { config }
    }

    pub fn segment(
        &self,
        matrix: &FeatureMatrix,
        outliers: &OutlierReport,
    ) -> Result<Segmentation> {
        let inliers = matrix.filter(|id| !outliers.is_outlier(id));
        info!(
            "Segmenting {} assets into {} clusters ({} outliers held out)",
            inliers.len(),
            self.config.n_clusters,
            outliers.n_outliers()
        );

        let (scaler, points) = StandardScaler::fit_transform(&inliers.to_rows());
        let fit = KMeans::new(self.config.clone()).fit(&points)?;
        let silhouette = silhouette_score(&points, &fit.labels)?;
        let davies_bouldin = davies_bouldin_index(&points, &fit.labels, self.config.n_clusters);

        let mut pairs: Vec<(AssetId, ClusterLabel)> = inliers
            .asset_ids()
            .zip(&fit.labels)
            .map(|(id, &l)| (id.to_string(), l as ClusterLabel))
            .collect();
        pairs.extend(
            outliers
                .outliers()
                .into_iter()
                .map(|id| (id.to_string(), OUTLIER_LABEL)),
        );
        let assignment = ClusterAssignment::from_pairs(pairs);

        let pca = Pca2::fit(&points);
        let scaled_all = scaler.transform(&matrix.to_rows());
        let projection = matrix
            .asset_ids()
            .zip(&scaled_all)
            .map(|(id, p)| {
                let (x, y) = pca.project(p);
                ProjectedPoint {
                    asset_id: id.to_string(),
                    cluster_label: assignment.label(id).unwrap_or(OUTLIER_LABEL),
                    x,
                    y,
                }
            })
            .collect();

        let summaries = summarize(matrix, &assignment);
        let diagnostics = ClusteringDiagnostics {
            silhouette,
            davies_bouldin,
            inertia: fit.inertia,
            iterations: fit.iterations,
            explained_variance: pca.explained_variance,
            cluster_sizes: assignment.cluster_sizes(),
            outlier_eps: outliers.eps,
            n_outliers: outliers.n_outliers(),
            outlier_fraction: outliers.outlier_fraction(),
        };
        info!(
            "Segmentation done: silhouette {:.3}, inertia {:.3}, sizes {:?}",
            silhouette, fit.inertia, diagnostics.cluster_sizes
        );

        Ok(Segmentation {
            assignment,
            summaries,
            projection,
            diagnostics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> Vec<Vec<f64>> {
        let centers = [(0.0, 0.0), (10.0, 0.0), (0.0, 10.0)];
        let offsets = [(0.1, 0.2), (-0.2, 0.1), (0.15, -0.1), (-0.1, -0.15)];
        centers
            .iter()
            .flat_map(|(cx, cy)| offsets.iter().map(move |(dx, dy)| vec![cx + dx, cy + dy]))
            .collect()
    }

    fn config(k: usize) -> ClusteringConfig {
        ClusteringConfig {
            n_clusters: k,
            ..Default::default()
        }
    }

    #[test]
    fn test_kmeans_separates_blobs() {
        let points = blobs();
        let fit = KMeans::new(config(3)).fit(&points).unwrap();

        for blob in fit.labels.chunks(4) {
            assert!(blob.iter().all(|l| *l == blob[0]), "blob split: {:?}", fit.labels);
        }
        assert_ne!(fit.labels[0], fit.labels[4]);
        assert_ne!(fit.labels[4], fit.labels[8]);
        assert!(fit.inertia < 1.0);
    }

    #[test]
    fn test_kmeans_deterministic() {
        let points = blobs();
        let a = KMeans::new(config(3)).fit(&points).unwrap();
        let b = KMeans::new(config(3)).fit(&points).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.inertia, b.inertia);
    }

    #[test]
    fn test_equidistant_point_goes_to_lower_index() {
        let centroids = vec![vec![-1.0, 0.0], vec![1.0, 0.0]];
        assert_eq!(nearest(&[0.0, 0.0], &centroids), 0);
    }

    #[test]
    fn test_empty_cluster_is_reseeded() {
        let points = vec![vec![0.0], vec![0.1], vec![5.0], vec![5.1]];
        let mut labels = vec![0, 0, 0, 0];
        let centroids = update(&points, &mut labels, 2);
        assert_eq!(centroids.len(), 2);
        assert!(labels.contains(&1));
    }

    #[test]
    fn test_sweep_peaks_at_three_blobs() {
        let points = blobs();
        let sweep = KMeans::new(config(3)).sweep(&points, 2..=6).unwrap();

        let ks: Vec<usize> = sweep.iter().map(|p| p.k).collect();
        assert_eq!(ks, vec![2, 3, 4, 5, 6]);
        assert_eq!(best_k(&sweep), Some(3));
        assert!(sweep[1].inertia < sweep[0].inertia);
        assert!(sweep.iter().all(|p| p.silhouette.is_some()));
        // The sweep K is independent of the configured one.
        let fit = KMeans::new(config(3)).fit(&points).unwrap();
        assert_eq!(sweep[1].inertia, fit.inertia);
    }

    #[test]
    fn test_sweep_bounds() {
        let points = blobs();
        let kmeans = KMeans::new(config(3));
        assert!(matches!(
            kmeans.sweep(&points, 1..=4),
            Err(PipelineError::ConfigError(_))
        ));
        assert!(matches!(
            kmeans.sweep(&points, 5..=3),
            Err(PipelineError::ConfigError(_))
        ));

        let sweep = kmeans.sweep(&points[..4], 2..=10).unwrap();
        assert_eq!(sweep.last().map(|p| p.k), Some(4));
        assert!(matches!(
            kmeans.sweep(&points[..1], 2..=3),
            Err(PipelineError::ClusteringDegenerate(_))
        ));
    }

    #[test]
    fn test_identical_points_collapse_to_one_cluster() {
        let points = vec![vec![1.0, 1.0]; 6];
        let fit = KMeans::new(config(2)).fit(&points).unwrap();
        assert!(fit.labels.iter().all(|l| *l == 0), "{:?}", fit.labels);
        assert_eq!(fit.inertia, 0.0);
        assert!(matches!(
            silhouette_score(&points, &fit.labels),
            Err(PipelineError::ClusteringDegenerate(_))
        ));
    }

    #[test]
    fn test_too_few_points() {
        let result = KMeans::new(config(4)).fit(&[vec![0.0], vec![1.0]]);
        assert!(matches!(result, Err(PipelineError::ClusteringDegenerate(_))));
    }

    #[test]
    fn test_silhouette() {
        let points = blobs();
        let labels: Vec<usize> = (0..12).map(|i| i / 4).collect();
        let s = silhouette_score(&points, &labels).unwrap();
        assert!(s > 0.9, "well separated blobs should score high: {}", s);

        let single = vec![0; 12];
        assert!(matches!(
            silhouette_score(&points, &single),
            Err(PipelineError::ClusteringDegenerate(_))
        ));
    }

    #[test]
    fn test_davies_bouldin() {
        let points = blobs();
        let labels: Vec<usize> = (0..12).map(|i| i / 4).collect();
        let db = davies_bouldin_index(&points, &labels, 3).unwrap();
        assert!(db > 0.0 && db < 0.1, "DB index: {}", db);
    }

    #[test]
    fn test_pca_explained_variance() {
        let points: Vec<Vec<f64>> = (0..10)
            .map(|i| vec![i as f64, 2.0 * i as f64 + if i % 2 == 0 { 0.1 } else { -0.1 }, 1.0])
            .collect();
        let pca = Pca2::fit(&points);
        assert!(pca.explained_variance[0] > 0.99);
        assert!(pca.explained_variance[0] + pca.explained_variance[1] <= 1.0 + 1e-9);
        let (x0, _) = pca.project(&points[0]);
        let (x9, _) = pca.project(&points[9]);
        assert!(x9 > x0);
    }

    #[test]
    fn test_assignment_queries() {
        let assignment =
            ClusterAssignment::from_pairs(vec![("B", 0), ("A", 0), ("C", OUTLIER_LABEL)]);
        assert_eq!(assignment.members(0), vec!["A", "B"]);
        assert!(assignment.is_outlier("C"));
        assert!(!assignment.is_outlier("A"));
        assert_eq!(assignment.cluster_sizes().get(&OUTLIER_LABEL), Some(&1));
    }
}
