use rayon::prelude::*;

/// Squared euclidean distance between two equal-length vectors.
pub fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    squared_euclidean(a, b).sqrt()
}

/// Pairwise distance matrix in condensed (upper-triangular) form,
/// `n*(n-1)/2` entries. Rows are filled in parallel.
pub fn condensed_matrix(x: &[Vec<f64>], squared: bool) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return Vec::new();
    }
    let rows: Vec<Vec<f64>> = (0..n - 1)
        .into_par_iter()
        .map(|i| {
            ((i + 1)..n)
                .map(|j| {
                    let d = squared_euclidean(&x[i], &x[j]);
                    if squared {
                        d
                    } else {
                        d.sqrt()
                    }
                })
                .collect()
        })
        .collect();
    rows.into_iter().flatten().collect()
}

/// Index into a condensed distance matrix for pair (i, j) where i != j.
pub fn condensed_index(i: usize, j: usize, n: usize) -> usize {
    debug_assert!(i != j);
    let (i, j) = if i < j { (i, j) } else { (j, i) };
    i * n - i * (i + 1) / 2 + j - i - 1
}

/// Lookup helper over a condensed matrix; distance to self is 0.
pub fn pair(condensed: &[f64], i: usize, j: usize, n: usize) -> f64 {
    if i == j {
        0.0
    } else {
        condensed[condensed_index(i, j, n)]
    }
}
