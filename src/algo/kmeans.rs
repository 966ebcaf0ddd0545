use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

use crate::algo::distance::squared_euclidean;
use crate::algo::{check_matrix, Clusterer, FittedClusterer, Matrix};
use crate::error::AlgoError;

/// K-means with k-means++ seeding and Lloyd iterations.
///
/// Runs `n_init` independent initializations from one seeded PRNG and keeps
/// the run with the lowest inertia (the earliest on ties).
#[derive(Debug, Clone)]
pub struct KMeans {
    pub n_init: usize,
    pub max_iter: usize,
    /// Convergence threshold, relative to the mean per-feature variance.
    pub tol: f64,
    pub seed: u64,
}

impl Default for KMeans {
    fn default() -> Self {
        Self {
            n_init: 10,
            max_iter: 300,
            tol: 1e-4,
            seed: 42,
        }
    }
}

impl KMeans {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }
}

/// A fitted k-means model.
#[derive(Debug, Clone)]
pub struct KMeansModel {
    pub centroids: Matrix,
    pub labels: Vec<usize>,
    pub inertia: f64,
    pub n_iter: usize,
}

impl FittedClusterer for KMeansModel {
    fn labels(&self) -> &[usize] {
        &self.labels
    }

    fn predict(&self, x: &[Vec<f64>]) -> Vec<usize> {
        x.par_iter()
            .map(|row| nearest(row, &self.centroids).0)
            .collect()
    }

    fn inertia(&self) -> f64 {
        self.inertia
    }
}

impl Clusterer for KMeans {
    type Model = KMeansModel;

    fn fit(&self, x: &[Vec<f64>], k: usize) -> Result<KMeansModel, AlgoError> {
        let dim = check_matrix(x)?;
        let n = x.len();
        if k == 0 {
            return Err(AlgoError::InvalidParameter("k must be at least 1".into()));
        }
        if k > n {
            return Err(AlgoError::InvalidParameter(format!(
                "k={k} exceeds the number of rows ({n})"
            )));
        }
        if self.n_init == 0 {
            return Err(AlgoError::InvalidParameter("n_init must be at least 1".into()));
        }

        let tol = self.tol * mean_variance(x, dim);
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut best: Option<KMeansModel> = None;

        for run in 0..self.n_init {
            let init = kmeans_plus_plus(x, k, &mut rng);
            let model = lloyd(x, init, self.max_iter, tol);
            if !model.inertia.is_finite() {
                return Err(AlgoError::NonFinite("k-means"));
            }
            debug!(run, inertia = model.inertia, n_iter = model.n_iter, "k-means run");
            let better = best
                .as_ref()
                .map_or(true, |b| model.inertia < b.inertia);
            if better {
                best = Some(model);
            }
        }

        best.ok_or(AlgoError::EmptyInput)
    }
}

/// Index and squared distance of the closest centroid; earliest wins ties.
fn nearest(row: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (c, centroid) in centroids.iter().enumerate() {
        let d = squared_euclidean(row, centroid);
        if d < best.1 {
            best = (c, d);
        }
    }
    best
}

fn mean_variance(x: &[Vec<f64>], dim: usize) -> f64 {
    if dim == 0 {
        return 0.0;
    }
    let n = x.len() as f64;
    let mut total = 0.0;
    for j in 0..dim {
        let mean = x.iter().map(|r| r[j]).sum::<f64>() / n;
        total += x.iter().map(|r| (r[j] - mean).powi(2)).sum::<f64>() / n;
    }
    total / dim as f64
}

/// Greedy k-means++: each new center is the best of `2 + ln(k)` candidates
/// drawn proportionally to squared distance from the chosen centers.
fn kmeans_plus_plus(x: &[Vec<f64>], k: usize, rng: &mut ChaCha8Rng) -> Matrix {
    let n = x.len();
    let n_trials = 2 + (k as f64).ln().floor() as usize;

    let first = rng.gen_range(0..n);
    let mut centers = vec![x[first].clone()];
    let mut closest: Vec<f64> = x
        .par_iter()
        .map(|row| squared_euclidean(row, &x[first]))
        .collect();
    let mut potential: f64 = closest.iter().sum();

    while centers.len() < k {
        let candidates: Vec<usize> = (0..n_trials)
            .map(|_| sample_weighted(&closest, potential, rng))
            .collect();

        let mut best_candidate = candidates[0];
        let mut best_potential = f64::INFINITY;
        let mut best_closest = Vec::new();
        for &cand in &candidates {
            let updated: Vec<f64> = x
                .par_iter()
                .zip(closest.par_iter())
                .map(|(row, &d)| d.min(squared_euclidean(row, &x[cand])))
                .collect();
            let pot: f64 = updated.iter().sum();
            if pot < best_potential {
                best_potential = pot;
                best_candidate = cand;
                best_closest = updated;
            }
        }

        centers.push(x[best_candidate].clone());
        closest = best_closest;
        potential = best_potential;
    }

    centers
}

/// Draw an index with probability proportional to `weights`; uniform when
/// every weight is zero (all remaining points coincide with a center).
fn sample_weighted(weights: &[f64], total: f64, rng: &mut ChaCha8Rng) -> usize {
    if total <= 0.0 {
        return rng.gen_range(0..weights.len());
    }
    let target = rng.gen::<f64>() * total;
    let mut acc = 0.0;
    for (i, &w) in weights.iter().enumerate() {
        acc += w;
        if acc > target {
            return i;
        }
    }
    weights
        .iter()
        .rposition(|&w| w > 0.0)
        .unwrap_or(weights.len() - 1)
}

fn lloyd(x: &[Vec<f64>], mut centroids: Matrix, max_iter: usize, tol: f64) -> KMeansModel {
    let k = centroids.len();
    let dim = centroids[0].len();
    let mut labels = vec![usize::MAX; x.len()];
    let mut n_iter = 0;

    for iter in 0..max_iter.max(1) {
        n_iter = iter + 1;
        let assigned: Vec<(usize, f64)> = x.par_iter().map(|row| nearest(row, &centroids)).collect();
        let changed = assigned
            .iter()
            .zip(&labels)
            .any(|((new, _), &old)| *new != old);
        labels = assigned.iter().map(|(c, _)| *c).collect();

        let mut sums = vec![vec![0.0; dim]; k];
        let mut counts = vec![0usize; k];
        for (row, &c) in x.iter().zip(&labels) {
            counts[c] += 1;
            for (s, v) in sums[c].iter_mut().zip(row) {
                *s += v;
            }
        }

        relocate_empty(x, &assigned, &mut labels, &mut sums, &mut counts);

        let mut shift = 0.0;
        for c in 0..k {
            let updated: Vec<f64> = sums[c].iter().map(|s| s / counts[c] as f64).collect();
            shift += squared_euclidean(&updated, &centroids[c]);
            centroids[c] = updated;
        }

        if !changed || shift <= tol {
            break;
        }
    }

    let assigned: Vec<(usize, f64)> = x.par_iter().map(|row| nearest(row, &centroids)).collect();
    let labels: Vec<usize> = assigned.iter().map(|(c, _)| *c).collect();
    let inertia = assigned.iter().map(|(_, d)| d).sum();

    KMeansModel {
        centroids,
        labels,
        inertia,
        n_iter,
    }
}

/// Move each empty cluster onto the point farthest from its current center.
fn relocate_empty(
    x: &[Vec<f64>],
    assigned: &[(usize, f64)],
    labels: &mut [usize],
    sums: &mut [Vec<f64>],
    counts: &mut [usize],
) {
    let empty: Vec<usize> = (0..counts.len()).filter(|&c| counts[c] == 0).collect();
    if empty.is_empty() {
        return;
    }

    let mut order: Vec<usize> = (0..x.len()).collect();
    order.sort_by(|&a, &b| {
        assigned[b]
            .1
            .partial_cmp(&assigned[a].1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut donors = order.into_iter();
    for c in empty {
        let Some(i) = donors.find(|&i| counts[labels[i]] > 1) else {
            break;
        };
        let old = labels[i];
        counts[old] -= 1;
        for (s, v) in sums[old].iter_mut().zip(&x[i]) {
            *s -= v;
        }
        labels[i] = c;
        counts[c] = 1;
        sums[c] = x[i].clone();
    }
}
