//! t-SNE to two dimensions.
//!
//! Input affinities are gaussian over squared euclidean distances, each row
//! calibrated by binary search to the target perplexity, then symmetrized.
//! The low-dimensional kernel is a Student-t with one degree of freedom.
//! Optimization is gradient descent with momentum and per-parameter gains,
//! starting from a scaled PCA projection.
//!
//! [`TsneMethod::BarnesHut`] (the default) keeps affinities only for the
//! `3 * perplexity` nearest neighbours of each row and approximates the
//! repulsive forces with a [`QuadTree`], so memory is `O(n * perplexity)`
//! and each iteration is `O(n log n)`. [`TsneMethod::Exact`] uses dense
//! `n x n` affinities and is only practical for small inputs.

use std::cmp::Ordering;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algo::distance::{condensed_matrix, pair, squared_euclidean};
use crate::algo::quadtree::QuadTree;
use crate::algo::{check_matrix, pca, Embedder};
use crate::error::AlgoError;

const PERPLEXITY_STEPS: usize = 100;
const PERPLEXITY_TOL: f64 = 1e-5;
const MIN_GAIN: f64 = 0.01;
const INIT_SCALE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TsneMethod {
    #[default]
    BarnesHut,
    Exact,
}

#[derive(Debug, Clone)]
pub struct Tsne {
    pub perplexity: f64,
    pub max_iter: usize,
    pub early_exaggeration: f64,
    /// Iterations run with exaggerated affinities and low momentum.
    pub exaggeration_iter: usize,
    pub min_grad_norm: f64,
    pub method: TsneMethod,
    /// Barnes–Hut opening angle; smaller is slower and more accurate.
    pub angle: f64,
    pub seed: u64,
}

impl Default for Tsne {
    fn default() -> Self {
        Self {
            perplexity: 30.0,
            max_iter: 1000,
            early_exaggeration: 12.0,
            exaggeration_iter: 250,
            min_grad_norm: 1e-7,
            method: TsneMethod::BarnesHut,
            angle: 0.5,
            seed: 42,
        }
    }
}

impl Tsne {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    /// Perplexity actually used for `n` points. Large perplexities are
    /// undefined for small inputs, so the target is capped at `(n - 1) / 3`.
    pub fn effective_perplexity(&self, n: usize) -> f64 {
        let cap = (n.saturating_sub(1) as f64 / 3.0).max(1.0);
        self.perplexity.min(cap)
    }

    /// Learning rate rule used when none is given: `max(n / ee / 4, 50)`.
    pub fn auto_learning_rate(&self, n: usize) -> f64 {
        (n as f64 / self.early_exaggeration / 4.0).max(50.0)
    }

    /// Neighbours kept per row by the Barnes–Hut method.
    pub fn neighbor_count(&self, n: usize) -> usize {
        let k = (3.0 * self.effective_perplexity(n) + 1.0) as usize;
        k.clamp(1, n.saturating_sub(1).max(1))
    }
}

/// Input affinities in the layout each method needs.
enum Affinities {
    Dense(Vec<Vec<f64>>),
    /// Per row, `(column, p)` sorted by column.
    Sparse(Vec<Vec<(usize, f64)>>),
}

impl Embedder for Tsne {
    fn fit_transform(&self, x: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, AlgoError> {
        check_matrix(x)?;
        let n = x.len();
        if n < 2 {
            return Err(AlgoError::InvalidParameter(
                "t-SNE needs at least 2 rows".into(),
            ));
        }
        if self.perplexity <= 0.0 {
            return Err(AlgoError::InvalidParameter(
                "perplexity must be positive".into(),
            ));
        }
        if self.method == TsneMethod::BarnesHut && !(0.0..=1.0).contains(&self.angle) {
            return Err(AlgoError::InvalidParameter(
                "Barnes-Hut angle must be within [0, 1]".into(),
            ));
        }

        let perplexity = self.effective_perplexity(n);
        if perplexity < self.perplexity {
            warn!(
                requested = self.perplexity,
                used = perplexity,
                rows = n,
                "perplexity capped for small input"
            );
        }

        let p = match self.method {
            TsneMethod::Exact => {
                Affinities::Dense(joint_probabilities(&condensed_matrix(x, true), n, perplexity))
            }
            TsneMethod::BarnesHut => {
                let k = self.neighbor_count(n);
                debug!(rows = n, neighbors = k, "sparse t-SNE affinities");
                Affinities::Sparse(sparse_joint_probabilities(x, k, perplexity))
            }
        };
        let mut y = initial_embedding(x, self.seed)?;

        let learning_rate = self.auto_learning_rate(n);
        let mut update = vec![[0.0f64; 2]; n];
        let mut gains = vec![[1.0f64; 2]; n];
        let mut kernel = match &p {
            Affinities::Dense(_) => vec![0.0; n * n],
            Affinities::Sparse(_) => Vec::new(),
        };

        let exaggeration_iter = self.exaggeration_iter.min(self.max_iter);
        for iter in 0..self.max_iter {
            let (exaggeration, momentum) = if iter < exaggeration_iter {
                (self.early_exaggeration, 0.5)
            } else {
                (1.0, 0.8)
            };

            let grad = match &p {
                Affinities::Dense(p) => exact_gradient(p, &y, exaggeration, &mut kernel),
                Affinities::Sparse(p) => barnes_hut_gradient(p, &y, exaggeration, self.angle),
            };
            let mut grad_norm = 0.0;
            for i in 0..n {
                for d in 0..2 {
                    let g = grad[i][d];
                    grad_norm += g * g;
                    if update[i][d] * g < 0.0 {
                        gains[i][d] += 0.2;
                    } else {
                        gains[i][d] *= 0.8;
                    }
                    gains[i][d] = gains[i][d].max(MIN_GAIN);
                    update[i][d] = momentum * update[i][d] - learning_rate * gains[i][d] * g;
                    y[i][d] += update[i][d];
                }
            }

            if !grad_norm.is_finite() {
                return Err(AlgoError::NonFinite("t-SNE gradient"));
            }
            if iter >= exaggeration_iter && grad_norm.sqrt() < self.min_grad_norm {
                debug!(iter, "t-SNE converged");
                break;
            }
        }

        if y.iter().flatten().any(|v| !v.is_finite()) {
            return Err(AlgoError::NonFinite("t-SNE"));
        }
        Ok(y)
    }
}

/// Symmetric joint probabilities `P`, dense `n x n`, zero diagonal.
fn joint_probabilities(distances: &[f64], n: usize, perplexity: f64) -> Vec<Vec<f64>> {
    let conditional: Vec<Vec<f64>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let row: Vec<f64> = (0..n).map(|j| pair(distances, i, j, n)).collect();
            conditional_row(&row, Some(i), perplexity)
        })
        .collect();

    let mut p = vec![vec![0.0; n]; n];
    let mut total = 0.0;
    for i in 0..n {
        for j in 0..n {
            if i != j {
                p[i][j] = conditional[i][j] + conditional[j][i];
                total += p[i][j];
            }
        }
    }
    let total = total.max(f64::EPSILON);
    for (i, row) in p.iter_mut().enumerate() {
        for (j, v) in row.iter_mut().enumerate() {
            if i != j {
                *v = (*v / total).max(f64::EPSILON);
            }
        }
    }
    p
}

/// The `k` nearest other rows to row `i` as `(index, squared distance)`,
/// closest first; equal distances order by index.
fn nearest_neighbors(x: &[Vec<f64>], i: usize, k: usize) -> Vec<(usize, f64)> {
    let mut candidates: Vec<(usize, f64)> = x
        .iter()
        .enumerate()
        .filter(|&(j, _)| j != i)
        .map(|(j, row)| (j, squared_euclidean(&x[i], row)))
        .collect();
    let by_distance = |a: &(usize, f64), b: &(usize, f64)| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then(a.0.cmp(&b.0))
    };
    if k < candidates.len() {
        candidates.select_nth_unstable_by(k, by_distance);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(by_distance);
    candidates
}

/// Symmetric joint probabilities over each row's `k` nearest neighbours.
fn sparse_joint_probabilities(x: &[Vec<f64>], k: usize, perplexity: f64) -> Vec<Vec<(usize, f64)>> {
    let n = x.len();
    let conditional: Vec<Vec<(usize, f64)>> = (0..n)
        .into_par_iter()
        .map(|i| {
            let neighbors = nearest_neighbors(x, i, k);
            let distances: Vec<f64> = neighbors.iter().map(|&(_, d)| d).collect();
            let probs = conditional_row(&distances, None, perplexity);
            neighbors.iter().map(|&(j, _)| j).zip(probs).collect()
        })
        .collect();

    let mut rows: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];
    for (i, row) in conditional.iter().enumerate() {
        for &(j, v) in row {
            rows[i].push((j, v));
            rows[j].push((i, v));
        }
    }

    let mut total = 0.0;
    for row in &mut rows {
        row.sort_by_key(|&(j, _)| j);
        let mut merged: Vec<(usize, f64)> = Vec::with_capacity(row.len());
        for &(j, v) in row.iter() {
            match merged.last_mut() {
                Some(last) if last.0 == j => last.1 += v,
                _ => merged.push((j, v)),
            }
        }
        total += merged.iter().map(|&(_, v)| v).sum::<f64>();
        *row = merged;
    }

    let total = total.max(f64::EPSILON);
    for row in &mut rows {
        for (_, v) in row.iter_mut() {
            *v = (*v / total).max(f64::EPSILON);
        }
    }
    rows
}

/// Conditional distribution over `distances` whose entropy matches
/// `ln(perplexity)`. The entry at `skip` (the row itself) gets zero.
fn conditional_row(distances: &[f64], skip: Option<usize>, perplexity: f64) -> Vec<f64> {
    let desired_entropy = perplexity.ln();
    let mut beta = 1.0;
    let mut beta_min = f64::NEG_INFINITY;
    let mut beta_max = f64::INFINITY;
    let mut probs = vec![0.0; distances.len()];

    for _ in 0..PERPLEXITY_STEPS {
        let mut sum_p = 0.0;
        for (j, &d) in distances.iter().enumerate() {
            probs[j] = if Some(j) == skip { 0.0 } else { (-d * beta).exp() };
            sum_p += probs[j];
        }
        if sum_p == 0.0 {
            sum_p = f64::EPSILON;
        }
        let mut sum_dp = 0.0;
        for (p, &d) in probs.iter_mut().zip(distances) {
            *p /= sum_p;
            sum_dp += d * *p;
        }
        let entropy = sum_p.ln() + beta * sum_dp;
        let diff = entropy - desired_entropy;
        if diff.abs() <= PERPLEXITY_TOL {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() {
                beta * 2.0
            } else {
                (beta + beta_max) / 2.0
            };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() {
                beta / 2.0
            } else {
                (beta + beta_min) / 2.0
            };
        }
    }
    probs
}

/// PCA projection rescaled so the first coordinate has standard deviation
/// `INIT_SCALE`. Falls back to small seeded noise when the data has no
/// variance along the first component.
fn initial_embedding(x: &[Vec<f64>], seed: u64) -> Result<Vec<[f64; 2]>, AlgoError> {
    let projected = pca::project_2d(x)?;
    let n = projected.len() as f64;
    let mean = projected.iter().map(|p| p[0]).sum::<f64>() / n;
    let std = (projected.iter().map(|p| (p[0] - mean).powi(2)).sum::<f64>() / n).sqrt();

    if std > f64::EPSILON {
        let scale = INIT_SCALE / std;
        return Ok(projected
            .into_iter()
            .map(|[a, b]| [a * scale, b * scale])
            .collect());
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    Ok((0..projected.len())
        .map(|_| [gaussian(&mut rng) * INIT_SCALE, gaussian(&mut rng) * INIT_SCALE])
        .collect())
}

/// Standard normal draw (Box-Muller).
fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Exact KL gradient. `kernel` is an `n * n` scratch buffer reused across
/// iterations.
fn exact_gradient(
    p: &[Vec<f64>],
    y: &[[f64; 2]],
    exaggeration: f64,
    kernel: &mut [f64],
) -> Vec<[f64; 2]> {
    let n = y.len();
    kernel.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, w) in row.iter_mut().enumerate() {
            *w = if i == j {
                0.0
            } else {
                let dx = y[i][0] - y[j][0];
                let dy = y[i][1] - y[j][1];
                1.0 / (1.0 + dx * dx + dy * dy)
            };
        }
    });
    let z = kernel
        .chunks(n)
        .map(|r| r.iter().sum::<f64>())
        .sum::<f64>()
        .max(f64::EPSILON);
    let kernel = &*kernel;

    (0..n)
        .into_par_iter()
        .map(|i| {
            let mut g = [0.0; 2];
            for j in 0..n {
                if i == j {
                    continue;
                }
                let w = kernel[i * n + j];
                let q = (w / z).max(f64::EPSILON);
                let coeff = (exaggeration * p[i][j] - q) * w;
                g[0] += coeff * (y[i][0] - y[j][0]);
                g[1] += coeff * (y[i][1] - y[j][1]);
            }
            [4.0 * g[0], 4.0 * g[1]]
        })
        .collect()
}

/// Barnes–Hut KL gradient: exact attraction over the sparse `P`, repulsion
/// from the quadtree.
fn barnes_hut_gradient(
    p: &[Vec<(usize, f64)>],
    y: &[[f64; 2]],
    exaggeration: f64,
    angle: f64,
) -> Vec<[f64; 2]> {
    let tree = QuadTree::build(y);
    let repulsion: Vec<([f64; 2], f64)> = y
        .par_iter()
        .map(|&point| tree.repulsion(point, angle))
        .collect();
    let z = repulsion
        .iter()
        .map(|&(_, q)| q)
        .sum::<f64>()
        .max(f64::EPSILON);

    p.par_iter()
        .enumerate()
        .map(|(i, row)| {
            let mut attract = [0.0; 2];
            for &(j, pij) in row {
                let dx = y[i][0] - y[j][0];
                let dy = y[i][1] - y[j][1];
                let w = 1.0 / (1.0 + dx * dx + dy * dy);
                attract[0] += pij * w * dx;
                attract[1] += pij * w * dy;
            }
            let (repel, _) = repulsion[i];
            [
                4.0 * (exaggeration * attract[0] - repel[0] / z),
                4.0 * (exaggeration * attract[1] - repel[1] / z),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_groups() -> Vec<Vec<f64>> {
        let mut x = Vec::new();
        for i in 0..8 {
            x.push(vec![1.0, 0.0, 0.0, (i % 2) as f64 * 0.1]);
        }
        for i in 0..8 {
            x.push(vec![0.0, 0.0, 1.0, (i % 2) as f64 * 0.1]);
        }
        x
    }

    fn fast() -> Tsne {
        Tsne {
            max_iter: 300,
            exaggeration_iter: 100,
            ..Tsne::default()
        }
    }

    #[test]
    fn embeds_every_row() {
        let y = fast().fit_transform(&two_groups()).unwrap();
        assert_eq!(y.len(), 16);
        assert!(y.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn deterministic() {
        let a = fast().fit_transform(&two_groups()).unwrap();
        let b = fast().fit_transform(&two_groups()).unwrap();
        assert_eq!(a, b);
    }

    /// Distance between the two group centroids over the first group's radius.
    fn separation(y: &[[f64; 2]]) -> (f64, f64) {
        let centroid = |pts: &[[f64; 2]]| {
            let n = pts.len() as f64;
            [
                pts.iter().map(|p| p[0]).sum::<f64>() / n,
                pts.iter().map(|p| p[1]).sum::<f64>() / n,
            ]
        };
        let a = centroid(&y[..8]);
        let b = centroid(&y[8..]);
        let between = ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt();
        let spread = y[..8]
            .iter()
            .map(|p| ((p[0] - a[0]).powi(2) + (p[1] - a[1]).powi(2)).sqrt())
            .fold(0.0, f64::max);
        (between, spread)
    }

    #[test]
    fn keeps_groups_apart() {
        let y = fast().fit_transform(&two_groups()).unwrap();
        let (between, spread) = separation(&y);
        assert!(between > spread, "between={between} spread={spread}");
    }

    #[test]
    fn exact_method_keeps_groups_apart() {
        let tsne = Tsne {
            method: TsneMethod::Exact,
            ..fast()
        };
        let y = tsne.fit_transform(&two_groups()).unwrap();
        let (between, spread) = separation(&y);
        assert!(between > spread, "between={between} spread={spread}");
    }

    #[test]
    fn rejects_out_of_range_angle() {
        let tsne = Tsne {
            angle: 1.5,
            ..fast()
        };
        assert!(matches!(
            tsne.fit_transform(&two_groups()),
            Err(AlgoError::InvalidParameter(_))
        ));
    }

    #[test]
    fn nearest_neighbors_closest_first_ties_by_index() {
        let x = vec![vec![0.0], vec![2.0], vec![1.0], vec![-1.0], vec![5.0]];
        let nn = nearest_neighbors(&x, 0, 3);
        assert_eq!(nn, vec![(2, 1.0), (3, 1.0), (1, 4.0)]);
        assert_eq!(nearest_neighbors(&x, 4, 10).len(), 4);
    }

    #[test]
    fn sparse_affinities_are_symmetric_and_normalized() {
        let x = two_groups();
        let p = sparse_joint_probabilities(&x, 5, 2.0);
        let total: f64 = p.iter().flatten().map(|&(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-9);
        for (i, row) in p.iter().enumerate() {
            assert!(row.windows(2).all(|w| w[0].0 < w[1].0));
            for &(j, v) in row {
                assert_ne!(i, j);
                let back = p[j].iter().find(|&&(c, _)| c == i).map(|&(_, v)| v);
                assert_eq!(back, Some(v));
            }
        }
    }

    #[test]
    fn neighbor_count_follows_perplexity() {
        let t = Tsne::default();
        assert_eq!(t.neighbor_count(5000), 91);
        assert_eq!(t.neighbor_count(10), 10 - 1);
        assert_eq!(t.neighbor_count(2), 1);
    }

    #[test]
    fn embeds_thousands_of_rows_in_bounded_time() {
        // One-hot style rows: 36 distinct profiles, many duplicates.
        let n = 3000;
        let x: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let mut row = vec![0.0; 12];
                row[i % 6] = 1.0;
                row[6 + (i / 6) % 6] = 1.0;
                row
            })
            .collect();
        let tsne = Tsne {
            max_iter: 250,
            exaggeration_iter: 100,
            ..Tsne::default()
        };
        let start = std::time::Instant::now();
        let y = tsne.fit_transform(&x).unwrap();
        let elapsed = start.elapsed();
        assert_eq!(y.len(), n);
        assert!(y.iter().flatten().all(|v| v.is_finite()));
        assert!(elapsed.as_secs() < 60, "took {elapsed:?}");
    }

    #[test]
    fn identical_rows_fall_back_to_noise_init() {
        let x = vec![vec![1.0, 0.0]; 5];
        let y = fast().fit_transform(&x).unwrap();
        assert_eq!(y.len(), 5);
        assert!(y.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn perplexity_capped_for_small_inputs() {
        let t = Tsne::default();
        assert_eq!(t.effective_perplexity(1000), 30.0);
        assert_eq!(t.effective_perplexity(10), 3.0);
        assert_eq!(t.effective_perplexity(2), 1.0);
    }

    #[test]
    fn auto_learning_rate_floor() {
        let t = Tsne::default();
        assert_eq!(t.auto_learning_rate(100), 50.0);
        assert_eq!(t.auto_learning_rate(4800), 100.0);
    }

    #[test]
    fn conditional_rows_sum_to_one() {
        let row = vec![0.0, 1.0, 4.0, 9.0];
        let p = conditional_row(&row, Some(0), 2.0);
        assert_eq!(p[0], 0.0);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }
}
