use std::collections::HashMap;
use std::thread;

use kmeans_colors::get_kmeans;
use log::{debug, info, warn};
use palette::Srgb;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::buffer::{Pixel, PixelBuffer};
use crate::cancel::CancelToken;
use crate::error::{MaskError, Result};

/// Largest `k` the `kmeans_colors` backend can label (its indices are `u8`).
const KMEANS_COLORS_MAX_K: usize = u8::MAX as usize;

/// Which k-means implementation refines the clusters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClusterBackend {
    /// Weighted Lloyd iterations over the distinct colors, init drawn from the pixel population.
    #[default]
    Lloyd,
    /// `kmeans_colors::get_kmeans` over every pixel as `Srgb<f32>` (k-means++ init).
    KmeansColors,
}

/// Parameters of one clustering run.
#[derive(Clone, Debug)]
pub struct ClusterConfig {
    /// Number of clusters. Must be at least 1 and no more than the number of distinct colors.
    pub k: usize,
    /// Upper bound on refinement steps per attempt.
    pub max_iterations: usize,
    /// Stop once no center moves further than this (Euclidean, 0-255 units).
    pub epsilon: f64,
    /// Independent restarts; the lowest-distortion one wins.
    pub attempts: usize,
    /// Seed for every random choice made during the run.
    pub seed: u64,
    pub backend: ClusterBackend,
    /// Run attempts on scoped worker threads. Ignored on wasm32.
    pub parallel: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            k: 8,
            max_iterations: 100,
            epsilon: 0.2,
            attempts: 10,
            seed: 0,
            backend: ClusterBackend::Lloyd,
            parallel: true,
        }
    }
}

impl ClusterConfig {
    pub fn with_k(k: usize) -> Self {
        Self { k, ..Self::default() }
    }

    /// Checks that do not need the image.
    pub fn validate(&self) -> Result<()> {
        if self.k < 1 {
            return Err(MaskError::InvalidParameter(format!(
                "color count must be at least 1, got {}",
                self.k
            )));
        }
        if self.attempts < 1 {
            return Err(MaskError::InvalidParameter(
                "at least one clustering attempt is required".to_string(),
            ));
        }
        if self.max_iterations < 1 {
            return Err(MaskError::InvalidParameter(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(MaskError::InvalidParameter(format!(
                "epsilon must be a finite non-negative number, got {}",
                self.epsilon
            )));
        }
        if self.backend == ClusterBackend::KmeansColors && self.k > KMEANS_COLORS_MAX_K {
            return Err(MaskError::InvalidParameter(format!(
                "the kmeans_colors backend supports at most {KMEANS_COLORS_MAX_K} colors, got {}",
                self.k
            )));
        }
        Ok(())
    }
}

/// Cluster index of every pixel, in the same row-major order as the source image.
///
/// Every label is in `0..k`; construction checks it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMap {
    labels: Vec<usize>,
    k: usize,
}

impl LabelMap {
    pub fn new(labels: Vec<usize>, k: usize) -> Result<Self> {
        if let Some((pos, &label)) = labels.iter().enumerate().find(|&(_, &l)| l >= k) {
            return Err(MaskError::Internal(format!(
                "label {label} at pixel {pos} is outside 0..{k}"
            )));
        }
        Ok(Self { labels, k })
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.labels
    }

    /// Number of pixels carrying each label.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.k];
        for &label in &self.labels {
            counts[label] += 1;
        }
        counts
    }
}

/// A cluster that lost all of its points during one refinement step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DegenerateCluster {
    pub attempt: usize,
    /// One-based refinement step in which the cluster came up empty.
    pub iteration: usize,
    pub cluster: usize,
}

/// Result of [`PixelClusterer::cluster`].
#[derive(Clone, Debug)]
pub struct Clustering {
    pub labels: LabelMap,
    /// Cluster centers rounded to 8 bits, indexed by label.
    pub centers: Vec<Srgb<u8>>,
    /// Sum of squared RGB distances from each pixel to its (unrounded) center.
    pub distortion: f64,
    /// Final distortion of every attempt, in attempt order.
    pub attempt_distortions: Vec<f64>,
    /// Distortion after each assignment pass of the winning attempt.
    /// Empty for [`ClusterBackend::KmeansColors`], which does not expose it.
    pub history: Vec<f64>,
    /// Refinement steps used by the winning attempt, when the backend reports it.
    pub iterations: Option<usize>,
    /// Empty-cluster events across all attempts.
    pub degenerate: Vec<DegenerateCluster>,
}

impl Clustering {
    pub fn k(&self) -> usize {
        self.centers.len()
    }

    pub fn center_pixels(&self) -> Vec<Pixel> {
        self.centers
            .iter()
            .map(|c| [c.red, c.green, c.blue])
            .collect()
    }

    /// Centers as `RRGGBB` hex strings.
    pub fn palette_hex(&self) -> Vec<String> {
        self.centers
            .iter()
            .map(|c| format!("{:02X}{:02X}{:02X}", c.red, c.green, c.blue))
            .collect()
    }
}

/// Partitions the pixels of an image into `k` color clusters.
#[derive(Clone, Debug, Default)]
pub struct PixelClusterer {
    config: ClusterConfig,
}

impl PixelClusterer {
    pub fn new(config: ClusterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Run every attempt and keep the one with the lowest distortion.
    ///
    /// Fails with `InvalidParameter` before any work when `k < 1` or when `k`
    /// exceeds the number of distinct colors in `image`. The image is only read.
    pub fn cluster(&self, image: &PixelBuffer, cancel: &CancelToken) -> Result<Clustering> {
        let cfg = &self.config;
        cfg.validate()?;

        let counts = ColorCounts::from_pixels(image.pixels());
        if cfg.k > counts.points.len() {
            return Err(MaskError::InvalidParameter(format!(
                "cannot form {} clusters from {} distinct colors",
                cfg.k,
                counts.points.len()
            )));
        }
        info!(
            "Clustering {} pixels ({} distinct colors) into {} clusters, {} attempt(s)",
            image.len(),
            counts.points.len(),
            cfg.k,
            cfg.attempts
        );

        // Sub-seeds are drawn up front so the outcome does not depend on scheduling.
        let mut rng = ChaCha8Rng::seed_from_u64(cfg.seed);
        let seeds: Vec<u64> = (0..cfg.attempts).map(|_| rng.random()).collect();

        let (attempts, pixel_to_point) = match cfg.backend {
            ClusterBackend::Lloyd => {
                let attempts = self.run_attempts(&seeds, |attempt, seed| {
                    let mut rng = ChaCha8Rng::seed_from_u64(seed);
                    let init = sample_centers(&counts.points, &counts.weights, cfg.k, &mut rng)?;
                    lloyd(
                        &counts.points,
                        &counts.weights,
                        init,
                        cfg.max_iterations,
                        cfg.epsilon,
                        attempt,
                        cancel,
                    )
                })?;
                (attempts, Some(counts.pixel_to_point.as_slice()))
            }
            ClusterBackend::KmeansColors => {
                let buf: Vec<Srgb> = image
                    .pixels()
                    .iter()
                    .map(|p| Srgb::<u8>::new(p[0], p[1], p[2]).into_format())
                    .collect();
                let attempts = self.run_attempts(&seeds, |_, seed| {
                    cancel.check()?;
                    Ok(kmeans_colors_attempt(image.pixels(), &buf, cfg, seed))
                })?;
                (attempts, None)
            }
        };

        let attempt_distortions: Vec<f64> = attempts.iter().map(|a| a.distortion).collect();
        let degenerate: Vec<DegenerateCluster> = attempts
            .iter()
            .flat_map(|a| a.degenerate.iter().copied())
            .collect();
        let (best_idx, best) = attempts
            .into_iter()
            .enumerate()
            .min_by(|a, b| a.1.distortion.total_cmp(&b.1.distortion))
            .ok_or_else(|| MaskError::Internal("no clustering attempt ran".to_string()))?;
        info!(
            "Attempt {} won with distortion {:.1} (iterations: {:?})",
            best_idx, best.distortion, best.iterations
        );

        let labels: Vec<usize> = match pixel_to_point {
            Some(map) => map.iter().map(|&p| best.labels[p]).collect(),
            None => best.labels,
        };

        Ok(Clustering {
            labels: LabelMap::new(labels, cfg.k)?,
            centers: best.centers.iter().map(round_center).collect(),
            distortion: best.distortion,
            attempt_distortions,
            history: best.history,
            iterations: best.iterations,
            degenerate,
        })
    }

    fn run_attempts<F>(&self, seeds: &[u64], run: F) -> Result<Vec<Attempt>>
    where
        F: Fn(usize, u64) -> Result<Attempt> + Sync,
    {
        let workers = worker_count(seeds.len());
        if self.config.parallel && workers > 1 && !cfg!(target_arch = "wasm32") {
            // Contiguous chunks keep the results in attempt order after the join.
            let chunk = seeds.len().div_ceil(workers);
            thread::scope(|s| {
                let run = &run;
                let handles: Vec<_> = seeds
                    .chunks(chunk)
                    .enumerate()
                    .map(|(c, part)| {
                        s.spawn(move || {
                            part.iter()
                                .enumerate()
                                .map(|(i, &seed)| run(c * chunk + i, seed))
                                .collect::<Vec<_>>()
                        })
                    })
                    .collect();
                let mut results = Vec::with_capacity(seeds.len());
                for h in handles {
                    match h.join() {
                        Ok(part) => results.extend(part),
                        Err(_) => {
                            return Err(MaskError::Internal(
                                "clustering worker panicked".to_string(),
                            ));
                        }
                    }
                }
                results.into_iter().collect()
            })
        } else {
            seeds
                .iter()
                .enumerate()
                .map(|(attempt, &seed)| run(attempt, seed))
                .collect()
        }
    }
}

/// Worker threads for `attempts` restarts: bounded by the available cores.
fn worker_count(attempts: usize) -> usize {
    let cores = thread::available_parallelism().map_or(1, |n| n.get());
    attempts.min(cores).max(1)
}

// ------------------------------------------------------------
// Lloyd refinement
// ------------------------------------------------------------

type Center = [f64; 3];

#[inline(always)]
fn squared_distance(a: &Center, b: &Center) -> f64 {
    let dr = a[0] - b[0];
    let dg = a[1] - b[1];
    let db = a[2] - b[2];
    dr * dr + dg * dg + db * db
}

fn round_center(c: &Center) -> Srgb<u8> {
    let channel = |v: f64| v.round().clamp(0.0, 255.0) as u8;
    Srgb::new(channel(c[0]), channel(c[1]), channel(c[2]))
}

/// Distinct colors of an image, weighted by how many pixels carry them.
struct ColorCounts {
    points: Vec<Center>,
    weights: Vec<f64>,
    /// Index into `points` for every pixel.
    pixel_to_point: Vec<usize>,
}

impl ColorCounts {
    fn from_pixels(pixels: &[Pixel]) -> Self {
        let mut index: HashMap<Pixel, usize> = HashMap::new();
        let mut points = Vec::new();
        let mut weights = Vec::new();
        let mut pixel_to_point = Vec::with_capacity(pixels.len());

        for &p in pixels {
            let idx = *index.entry(p).or_insert_with(|| {
                points.push([p[0] as f64, p[1] as f64, p[2] as f64]);
                weights.push(0.0);
                points.len() - 1
            });
            weights[idx] += 1.0;
            pixel_to_point.push(idx);
        }

        Self { points, weights, pixel_to_point }
    }
}

struct Attempt {
    centers: Vec<Center>,
    /// Label per point (distinct color for Lloyd, pixel for kmeans_colors).
    labels: Vec<usize>,
    distortion: f64,
    history: Vec<f64>,
    iterations: Option<usize>,
    degenerate: Vec<DegenerateCluster>,
}

/// Pick `k` distinct points as the starting centers, each drawn with
/// probability proportional to its pixel count.
fn sample_centers<R: Rng + ?Sized>(
    points: &[Center],
    weights: &[f64],
    k: usize,
    rng: &mut R,
) -> Result<Vec<Center>> {
    let picked = rand::seq::index::sample_weighted(rng, points.len(), |i| weights[i], k)
        .map_err(|e| MaskError::Internal(format!("initial center sampling failed: {e}")))?;
    Ok(picked.into_iter().map(|i| points[i]).collect())
}

/// Nearest center and its squared distance. Ties go to the lowest index.
fn nearest(point: &Center, centers: &[Center]) -> (usize, f64) {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, c) in centers.iter().enumerate() {
        let d = squared_distance(point, c);
        if d < best_dist {
            best_dist = d;
            best = idx;
        }
    }
    (best, best_dist)
}

/// Assign every point to its nearest center; returns the weighted distortion.
fn assign(
    points: &[Center],
    weights: &[f64],
    centers: &[Center],
    labels: &mut [usize],
    dists: &mut [f64],
) -> f64 {
    let mut total = 0.0;
    for (i, p) in points.iter().enumerate() {
        let (label, d) = nearest(p, centers);
        labels[i] = label;
        dists[i] = d;
        total += d * weights[i];
    }
    total
}

/// Point with the largest weighted distortion that is not yet used as a reseed.
fn farthest_point(dists: &[f64], weights: &[f64], taken: &[usize]) -> Option<usize> {
    dists
        .iter()
        .zip(weights)
        .enumerate()
        .filter(|(i, (d, _))| **d > 0.0 && !taken.contains(i))
        .max_by(|a, b| (a.1.0 * a.1.1).total_cmp(&(b.1.0 * b.1.1)))
        .map(|(i, _)| i)
}

/// Weighted Lloyd iterations starting from `centers`.
///
/// Each step assigns points, records the distortion, then moves every center
/// to the mean of its points. A center left without points is moved onto the
/// worst-served point so the next assignment can only lower the distortion.
/// A final assignment pass makes the labels agree with the returned centers.
fn lloyd(
    points: &[Center],
    weights: &[f64],
    mut centers: Vec<Center>,
    max_iterations: usize,
    epsilon: f64,
    attempt: usize,
    cancel: &CancelToken,
) -> Result<Attempt> {
    let k = centers.len();
    let mut labels = vec![0usize; points.len()];
    let mut dists = vec![0.0f64; points.len()];
    let mut history = Vec::new();
    let mut degenerate = Vec::new();
    let mut iterations = 0;

    while iterations < max_iterations {
        cancel.check()?;
        let distortion = assign(points, weights, &centers, &mut labels, &mut dists);
        history.push(distortion);
        iterations += 1;

        let mut sums = vec![[0.0f64; 3]; k];
        let mut mass = vec![0.0f64; k];
        for ((p, &w), &label) in points.iter().zip(weights).zip(&labels) {
            sums[label][0] += p[0] * w;
            sums[label][1] += p[1] * w;
            sums[label][2] += p[2] * w;
            mass[label] += w;
        }

        let mut shift = 0.0f64;
        let mut taken: Vec<usize> = Vec::new();
        for j in 0..k {
            let next = if mass[j] > 0.0 {
                [sums[j][0] / mass[j], sums[j][1] / mass[j], sums[j][2] / mass[j]]
            } else {
                warn!("Attempt {attempt}, iteration {iterations}: cluster {j} is empty");
                degenerate.push(DegenerateCluster { attempt, iteration: iterations, cluster: j });
                match farthest_point(&dists, weights, &taken) {
                    Some(i) => {
                        taken.push(i);
                        points[i]
                    }
                    None => centers[j],
                }
            };
            shift = shift.max(squared_distance(&centers[j], &next).sqrt());
            centers[j] = next;
        }

        debug!(
            "Attempt {attempt}, iteration {iterations}: distortion {distortion:.1}, max shift {shift:.4}"
        );
        if shift <= epsilon {
            break;
        }
    }

    let distortion = assign(points, weights, &centers, &mut labels, &mut dists);
    history.push(distortion);
    debug!("Attempt {attempt} finished after {iterations} iteration(s), distortion {distortion:.1}");

    Ok(Attempt {
        centers,
        labels,
        distortion,
        history,
        iterations: Some(iterations),
        degenerate,
    })
}

// ------------------------------------------------------------
// kmeans_colors backend
// ------------------------------------------------------------

fn kmeans_colors_attempt(pixels: &[Pixel], buf: &[Srgb], cfg: &ClusterConfig, seed: u64) -> Attempt {
    // kmeans_colors works on 0-1 components.
    let converge = (cfg.epsilon / 255.0) as f32;
    let kmeans = get_kmeans(cfg.k, cfg.max_iterations, converge, false, buf, seed);

    let centers: Vec<Center> = kmeans
        .centroids
        .iter()
        .map(|c| {
            [
                c.red as f64 * 255.0,
                c.green as f64 * 255.0,
                c.blue as f64 * 255.0,
            ]
        })
        .collect();
    let labels: Vec<usize> = kmeans.indices.iter().map(|&i| i as usize).collect();

    let distortion = pixels
        .iter()
        .zip(&labels)
        .map(|(p, &label)| {
            squared_distance(&[p[0] as f64, p[1] as f64, p[2] as f64], &centers[label])
        })
        .sum();

    Attempt {
        centers,
        labels,
        distortion,
        history: Vec::new(),
        iterations: None,
        degenerate: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_counts_deduplicate_in_first_seen_order() {
        let pixels = [[9, 9, 9], [1, 2, 3], [9, 9, 9], [9, 9, 9]];
        let counts = ColorCounts::from_pixels(&pixels);
        assert_eq!(counts.points, vec![[9.0, 9.0, 9.0], [1.0, 2.0, 3.0]]);
        assert_eq!(counts.weights, vec![3.0, 1.0]);
        assert_eq!(counts.pixel_to_point, vec![0, 1, 0, 0]);
    }

    #[test]
    fn nearest_prefers_lowest_index_on_ties() {
        let centers = [[10.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        let (label, d) = nearest(&[0.0, 0.0, 0.0], &centers);
        assert_eq!(label, 1);
        assert_eq!(d, 0.0);
    }

    #[test]
    fn empty_cluster_is_reseeded_onto_worst_point() {
        let points = vec![[0.0, 0.0, 0.0], [10.0, 10.0, 10.0], [200.0, 200.0, 200.0]];
        let weights = vec![1.0, 1.0, 1.0];
        // The second center starts far from everything and attracts nothing.
        let init = vec![[50.0, 50.0, 50.0], [0.0, 255.0, 0.0]];

        let attempt = lloyd(&points, &weights, init, 20, 0.01, 0, &CancelToken::new()).unwrap();

        assert!(!attempt.degenerate.is_empty());
        assert_eq!(attempt.degenerate[0].cluster, 1);
        assert_eq!(attempt.degenerate[0].iteration, 1);
        // The far point ends up alone in the reseeded cluster.
        assert_eq!(attempt.labels[0], attempt.labels[1]);
        assert_ne!(attempt.labels[0], attempt.labels[2]);
        assert_eq!(attempt.centers[attempt.labels[2]], [200.0, 200.0, 200.0]);
        assert!((attempt.distortion - 150.0).abs() < 1e-9);
    }

    #[test]
    fn lloyd_stops_on_cancellation() {
        let points = vec![[0.0, 0.0, 0.0], [255.0, 255.0, 255.0]];
        let weights = vec![1.0, 1.0];
        let cancel = CancelToken::new();
        cancel.cancel();
        let result = lloyd(&points, &weights, points.clone(), 10, 0.1, 0, &cancel);
        assert!(matches!(result, Err(MaskError::Cancelled)));
    }

    #[test]
    fn initial_centers_follow_pixel_counts() {
        let mut points: Vec<Center> = vec![[128.0, 128.0, 128.0]];
        let mut weights = vec![9990.0];
        for i in 0..10 {
            points.push([i as f64 * 20.0, 0.0, 255.0]);
            weights.push(1.0);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(1);

        let dominant = (0..1000)
            .filter(|_| sample_centers(&points, &weights, 1, &mut rng).unwrap()[0] == points[0])
            .count();

        assert!(dominant > 950, "dominant color picked {dominant}/1000 times");
    }

    #[test]
    fn weighted_sampling_still_picks_distinct_points() {
        let points: Vec<Center> = (0..6).map(|i| [i as f64, 0.0, 0.0]).collect();
        let weights = vec![100.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let mut rng = ChaCha8Rng::seed_from_u64(5);

        let mut init = sample_centers(&points, &weights, 6, &mut rng).unwrap();
        init.sort_by(|a, b| a[0].total_cmp(&b[0]));
        assert_eq!(init, points);
    }

    #[test]
    fn zero_epsilon_stops_once_centers_settle() {
        let points = vec![[0.0, 0.0, 0.0], [255.0, 255.0, 255.0]];
        let weights = vec![1.0, 1.0];

        let attempt = lloyd(&points, &weights, points.clone(), 50, 0.0, 0, &CancelToken::new()).unwrap();

        assert_eq!(attempt.iterations, Some(1));
        assert_eq!(attempt.history, vec![0.0, 0.0]);
    }

    #[test]
    fn workers_are_bounded_by_attempts_and_cores() {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        assert_eq!(worker_count(1), 1);
        assert!(worker_count(10_000) <= cores);
        assert!(worker_count(10_000) >= 1);
        assert!(worker_count(3) <= 3);
    }

    #[test]
    fn history_never_increases() {
        let points: Vec<Center> = (0..40)
            .map(|i| {
                let v = (i * 37 % 256) as f64;
                [v, (i * 11 % 256) as f64, 255.0 - v]
            })
            .collect();
        let weights: Vec<f64> = (0..40).map(|i| 1.0 + (i % 5) as f64).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let init = sample_centers(&points, &weights, 5, &mut rng).unwrap();

        let attempt = lloyd(&points, &weights, init, 100, 0.0, 0, &CancelToken::new()).unwrap();

        for pair in attempt.history.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-6, "distortion rose: {pair:?}");
        }
    }
}
