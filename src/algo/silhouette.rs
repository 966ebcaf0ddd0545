use std::collections::BTreeMap;

use rayon::prelude::*;

use crate::algo::distance::euclidean;
use crate::algo::{check_matrix, QualityScorer};
use crate::error::AlgoError;

/// Mean silhouette coefficient with euclidean distance.
///
/// Points in singleton clusters score 0. Undefined (error) unless the
/// number of distinct labels is between 2 and n-1 inclusive.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silhouette;

impl QualityScorer for Silhouette {
    fn score(&self, x: &[Vec<f64>], labels: &[usize]) -> Result<f64, AlgoError> {
        silhouette_score(x, labels)
    }
}

pub fn silhouette_score(x: &[Vec<f64>], labels: &[usize]) -> Result<f64, AlgoError> {
    check_matrix(x)?;
    let n = x.len();
    if labels.len() != n {
        return Err(AlgoError::InvalidParameter(format!(
            "{} labels for {n} rows",
            labels.len()
        )));
    }

    // Dense re-indexing of whatever label values were produced.
    let mut index: BTreeMap<usize, usize> = BTreeMap::new();
    for &l in labels {
        let next = index.len();
        index.entry(l).or_insert(next);
    }
    let n_labels = index.len();
    if n_labels < 2 || n_labels > n - 1 {
        return Err(AlgoError::InvalidParameter(format!(
            "number of labels is {n_labels}; silhouette needs 2 to n_samples - 1 ({})",
            n - 1
        )));
    }
    let dense: Vec<usize> = labels.iter().map(|l| index[l]).collect();
    let mut sizes = vec![0usize; n_labels];
    for &c in &dense {
        sizes[c] += 1;
    }

    let per_point: Vec<f64> = (0..n)
        .into_par_iter()
        .map(|i| {
            let own = dense[i];
            if sizes[own] <= 1 {
                return 0.0;
            }
            let mut sums = vec![0.0; n_labels];
            for j in 0..n {
                if j != i {
                    sums[dense[j]] += euclidean(&x[i], &x[j]);
                }
            }
            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = (0..n_labels)
                .filter(|&c| c != own)
                .map(|c| sums[c] / sizes[c] as f64)
                .fold(f64::INFINITY, f64::min);
            let denom = a.max(b);
            if denom > 0.0 {
                (b - a) / denom
            } else {
                0.0
            }
        })
        .collect();

    let score = per_point.iter().sum::<f64>() / n as f64;
    if score.is_finite() {
        Ok(score)
    } else {
        Err(AlgoError::NonFinite("silhouette"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_separated_scores_high() {
        let x = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![10.0, 10.0],
            vec![10.1, 10.0],
        ];
        let s = silhouette_score(&x, &[0, 0, 1, 1]).unwrap();
        assert!(s > 0.95, "got {s}");
    }

    #[test]
    fn bad_labeling_scores_negative() {
        let x = vec![
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![10.0, 10.0],
            vec![10.1, 10.0],
        ];
        let s = silhouette_score(&x, &[0, 1, 0, 1]).unwrap();
        assert!(s < 0.0, "got {s}");
        assert!(s >= -1.0);
    }

    #[test]
    fn single_label_is_undefined() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        assert!(silhouette_score(&x, &[0, 0, 0]).is_err());
    }

    #[test]
    fn one_label_per_point_is_undefined() {
        let x = vec![vec![0.0], vec![1.0], vec![2.0]];
        assert!(silhouette_score(&x, &[0, 1, 2]).is_err());
    }

    #[test]
    fn singleton_cluster_contributes_zero() {
        let x = vec![vec![0.0], vec![0.0], vec![5.0]];
        let s = silhouette_score(&x, &[0, 0, 1]).unwrap();
        // Two identical points: a = 0, b = 5 -> 1.0 each; singleton -> 0.
        assert!((s - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn label_values_need_not_be_dense() {
        let x = vec![vec![0.0], vec![0.1], vec![9.0], vec![9.1]];
        let a = silhouette_score(&x, &[3, 3, 7, 7]).unwrap();
        let b = silhouette_score(&x, &[0, 0, 1, 1]).unwrap();
        assert_eq!(a, b);
    }
}
