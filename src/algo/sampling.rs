use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Random sample of `size` indices from `0..total` using a seeded PRNG.
///
/// Partial Fisher-Yates shuffle, then sorted so the sampled rows keep their
/// source order. Same `(total, size, seed)` always gives the same indices.
pub fn random_sample(total: usize, size: usize, seed: u64) -> Vec<usize> {
    if size >= total {
        return (0..total).collect();
    }
    let mut indices: Vec<usize> = (0..total).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for i in 0..size {
        let j = rng.gen_range(i..total);
        indices.swap(i, j);
    }
    indices.truncate(size);
    indices.sort_unstable();
    indices
}

/// Apply an optional row limit: `None` when no sampling is needed.
pub fn limit_rows(total: usize, limit: Option<usize>, seed: u64) -> Option<Vec<usize>> {
    match limit {
        Some(limit) if total > limit => Some(random_sample(total, limit, seed)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_sample_correct_size() {
        let s = random_sample(500, 50, 42);
        assert_eq!(s.len(), 50);
        assert!(s.iter().all(|&i| i < 500));
    }

    #[test]
    fn random_sample_deterministic() {
        assert_eq!(random_sample(100, 10, 42), random_sample(100, 10, 42));
    }

    #[test]
    fn random_sample_different_seeds() {
        assert_ne!(random_sample(100, 10, 1), random_sample(100, 10, 2));
    }

    #[test]
    fn random_sample_oversized() {
        assert_eq!(random_sample(5, 10, 42), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn random_sample_no_duplicates_and_sorted() {
        let s = random_sample(100, 60, 7);
        for w in s.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn limit_rows_only_when_exceeded() {
        assert!(limit_rows(10, None, 42).is_none());
        assert!(limit_rows(10, Some(10), 42).is_none());
        assert!(limit_rows(10, Some(20), 42).is_none());
        assert_eq!(limit_rows(10, Some(4), 42).map(|v| v.len()), Some(4));
    }
}
