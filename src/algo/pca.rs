use crate::algo::{check_matrix, Matrix};
use crate::error::AlgoError;

const POWER_ITERATIONS: usize = 500;
const POWER_TOL: f64 = 1e-12;
const RELATIVE_EIGEN_FLOOR: f64 = 1e-10;

/// Project rows onto their top two principal components.
///
/// Components come from power iteration on the covariance matrix with
/// deflation. Each component's sign is fixed so that its largest-magnitude
/// loading is positive, which keeps the projection deterministic.
pub fn project_2d(x: &[Vec<f64>]) -> Result<Vec<[f64; 2]>, AlgoError> {
    let dim = check_matrix(x)?;
    let n = x.len();

    let means: Vec<f64> = (0..dim)
        .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / n as f64)
        .collect();
    let centered: Matrix = x
        .iter()
        .map(|r| r.iter().zip(&means).map(|(v, m)| v - m).collect())
        .collect();

    let mut cov = vec![vec![0.0; dim]; dim];
    for row in &centered {
        for a in 0..dim {
            if row[a] == 0.0 {
                continue;
            }
            for b in a..dim {
                cov[a][b] += row[a] * row[b];
            }
        }
    }
    let denom = (n.max(2) - 1) as f64;
    for a in 0..dim {
        for b in a..dim {
            cov[a][b] /= denom;
            cov[b][a] = cov[a][b];
        }
    }

    let trace: f64 = (0..dim).map(|a| cov[a][a]).sum();
    let floor = trace * RELATIVE_EIGEN_FLOOR;

    let first = leading_eigenvector(&cov, None, floor);
    if let Some((vec, value)) = &first {
        deflate(&mut cov, vec, *value);
    }
    let second = leading_eigenvector(&cov, first.as_ref().map(|(v, _)| v.as_slice()), floor);

    let components: Vec<Vec<f64>> = [first, second]
        .into_iter()
        .map(|c| c.map(|(v, _)| v).unwrap_or_else(|| vec![0.0; dim]))
        .collect();

    Ok(centered
        .iter()
        .map(|row| {
            let p0: f64 = row.iter().zip(&components[0]).map(|(a, b)| a * b).sum();
            let p1: f64 = row.iter().zip(&components[1]).map(|(a, b)| a * b).sum();
            [p0, p1]
        })
        .collect())
}

/// Unit eigenvector and eigenvalue of the dominant eigenpair, kept
/// orthogonal to `exclude`. `None` when the remaining variance is at or
/// below `floor`.
fn leading_eigenvector(
    m: &[Vec<f64>],
    exclude: Option<&[f64]>,
    floor: f64,
) -> Option<(Vec<f64>, f64)> {
    let dim = m.len();
    if dim == 0 || floor <= 0.0 {
        return None;
    }
    // Deterministic, non-degenerate start vector.
    let mut v: Vec<f64> = (0..dim)
        .map(|i| 1.0 + ((i * 7) % 11) as f64 / 11.0)
        .collect();
    orthogonalize(&mut v, exclude);
    normalize(&mut v)?;

    let mut eigenvalue = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let mut next: Vec<f64> = m
            .iter()
            .map(|row| row.iter().zip(&v).map(|(a, b)| a * b).sum())
            .collect();
        orthogonalize(&mut next, exclude);
        let norm = normalize(&mut next)?;
        let delta: f64 = next.iter().zip(&v).map(|(a, b)| (a - b).abs()).sum();
        v = next;
        eigenvalue = norm;
        if delta < POWER_TOL {
            break;
        }
    }

    if eigenvalue <= floor {
        return None;
    }

    let pivot = v
        .iter()
        .copied()
        .fold(0.0f64, |acc, x| if x.abs() > acc.abs() { x } else { acc });
    if pivot < 0.0 {
        v.iter_mut().for_each(|x| *x = -*x);
    }
    Some((v, eigenvalue))
}

fn orthogonalize(v: &mut [f64], exclude: Option<&[f64]>) {
    if let Some(u) = exclude {
        let dot: f64 = v.iter().zip(u).map(|(a, b)| a * b).sum();
        v.iter_mut().zip(u).for_each(|(a, b)| *a -= dot * b);
    }
}

fn normalize(v: &mut [f64]) -> Option<f64> {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm <= f64::EPSILON || !norm.is_finite() {
        return None;
    }
    v.iter_mut().for_each(|x| *x /= norm);
    Some(norm)
}

fn deflate(m: &mut [Vec<f64>], v: &[f64], value: f64) {
    for (a, row) in m.iter_mut().enumerate() {
        for (b, cell) in row.iter_mut().enumerate() {
            *cell -= value * v[a] * v[b];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projects_line_onto_first_component() {
        let x: Matrix = (0..10).map(|i| vec![i as f64, 2.0 * i as f64]).collect();
        let p = project_2d(&x).unwrap();
        assert_eq!(p.len(), 10);
        // All variance lives on one axis.
        for pt in &p {
            assert!(pt[1].abs() < 1e-6, "second component {}", pt[1]);
        }
        assert!(p[9][0] > p[0][0]);
    }

    #[test]
    fn projection_is_centered() {
        let x: Matrix = vec![vec![1.0, 0.0, 3.0], vec![0.0, 1.0, 2.0], vec![1.0, 1.0, 0.0]];
        let p = project_2d(&x).unwrap();
        let mean0: f64 = p.iter().map(|r| r[0]).sum::<f64>() / 3.0;
        assert!(mean0.abs() < 1e-9);
    }

    #[test]
    fn constant_data_projects_to_origin() {
        let x: Matrix = vec![vec![1.0, 1.0]; 4];
        let p = project_2d(&x).unwrap();
        assert!(p.iter().all(|r| r[0] == 0.0 && r[1] == 0.0));
    }

    #[test]
    fn empty_is_error() {
        assert!(project_2d(&[]).is_err());
    }
}
