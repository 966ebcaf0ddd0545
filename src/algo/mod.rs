//! Pure algorithms. Nothing in here touches the filesystem.
//!
//! The four traits below are the seams the pipeline is generic over, so an
//! alternative encoder, clusterer, quality metric or 2D embedding can be
//! plugged in without touching reconciliation or artifact I/O.

pub mod distance;
pub mod encoding;
pub mod kmeans;
pub mod normalize;
pub mod pca;
pub mod quadtree;
pub mod sampling;
pub mod silhouette;
pub mod tsne;

use crate::error::AlgoError;

/// Dense row-major feature matrix.
pub type Matrix = Vec<Vec<f64>>;

/// Turns categorical rows into a numeric feature matrix.
pub trait Encoder {
    type Model: FittedEncoder;

    fn fit(&self, rows: &[Vec<String>]) -> Result<Self::Model, AlgoError>;
}

pub trait FittedEncoder {
    fn transform(&self, rows: &[Vec<String>]) -> Matrix;

    fn feature_names(&self) -> Vec<String>;
}

/// Partitions rows of a feature matrix into `k` groups.
pub trait Clusterer {
    type Model: FittedClusterer;

    fn fit(&self, x: &[Vec<f64>], k: usize) -> Result<Self::Model, AlgoError>;
}

pub trait FittedClusterer {
    /// Label per training row, in `0..k`.
    fn labels(&self) -> &[usize];

    fn predict(&self, x: &[Vec<f64>]) -> Vec<usize>;

    /// Within-cluster sum of squared distances.
    fn inertia(&self) -> f64;
}

/// Scores a labeling, higher is better.
pub trait QualityScorer {
    fn score(&self, x: &[Vec<f64>], labels: &[usize]) -> Result<f64, AlgoError>;
}

/// Projects a feature matrix to 2D for display.
pub trait Embedder {
    fn fit_transform(&self, x: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, AlgoError>;
}

/// Check that `x` is non-empty and rectangular; returns the column count.
pub(crate) fn check_matrix(x: &[Vec<f64>]) -> Result<usize, AlgoError> {
    let first = x.first().ok_or(AlgoError::EmptyInput)?;
    let dim = first.len();
    for (row, values) in x.iter().enumerate() {
        if values.len() != dim {
            return Err(AlgoError::DimensionMismatch {
                row,
                expected: dim,
                found: values.len(),
            });
        }
    }
    Ok(dim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_matrix_rejects_empty() {
        assert_eq!(check_matrix(&[]), Err(AlgoError::EmptyInput));
    }

    #[test]
    fn check_matrix_rejects_ragged() {
        let x = vec![vec![1.0, 2.0], vec![1.0]];
        assert!(matches!(
            check_matrix(&x),
            Err(AlgoError::DimensionMismatch { row: 1, .. })
        ));
    }

    #[test]
    fn check_matrix_returns_width() {
        let x = vec![vec![1.0, 2.0, 3.0]; 4];
        assert_eq!(check_matrix(&x), Ok(3));
    }
}
