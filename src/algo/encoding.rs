use std::collections::BTreeSet;

use crate::algo::{Encoder, FittedEncoder, Matrix};
use crate::error::AlgoError;

/// One-hot encoder for categorical text rows.
///
/// Every distinct value seen per column during `fit` becomes one binary
/// feature. Values not seen during `fit` encode as all zeros for that column.
#[derive(Debug, Clone, Default)]
pub struct OneHotEncoder {
    /// Column names used for feature naming; falls back to `x0`, `x1`, ...
    pub column_names: Vec<String>,
}

impl OneHotEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column_names(column_names: Vec<String>) -> Self {
        Self { column_names }
    }
}

/// Learned categories per column, sorted.
#[derive(Debug, Clone)]
pub struct OneHotModel {
    column_names: Vec<String>,
    categories: Vec<Vec<String>>,
    offsets: Vec<usize>,
    width: usize,
}

impl OneHotModel {
    pub fn categories(&self) -> &[Vec<String>] {
        &self.categories
    }

    pub fn n_features(&self) -> usize {
        self.width
    }
}

impl Encoder for OneHotEncoder {
    type Model = OneHotModel;

    fn fit(&self, rows: &[Vec<String>]) -> Result<OneHotModel, AlgoError> {
        let first = rows.first().ok_or(AlgoError::EmptyInput)?;
        let n_cols = first.len();
        if n_cols == 0 {
            return Err(AlgoError::InvalidParameter(
                "cannot one-hot encode rows with no columns".into(),
            ));
        }

        let mut seen: Vec<BTreeSet<&str>> = vec![BTreeSet::new(); n_cols];
        for (row, values) in rows.iter().enumerate() {
            if values.len() != n_cols {
                return Err(AlgoError::DimensionMismatch {
                    row,
                    expected: n_cols,
                    found: values.len(),
                });
            }
            for (col, value) in values.iter().enumerate() {
                seen[col].insert(value.as_str());
            }
        }

        let categories: Vec<Vec<String>> = seen
            .into_iter()
            .map(|set| set.into_iter().map(str::to_string).collect())
            .collect();

        let mut offsets = Vec::with_capacity(n_cols);
        let mut width = 0;
        for cats in &categories {
            offsets.push(width);
            width += cats.len();
        }

        let column_names = (0..n_cols)
            .map(|i| {
                self.column_names
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("x{i}"))
            })
            .collect();

        Ok(OneHotModel {
            column_names,
            categories,
            offsets,
            width,
        })
    }
}

impl FittedEncoder for OneHotModel {
    fn transform(&self, rows: &[Vec<String>]) -> Matrix {
        rows.iter()
            .map(|values| {
                let mut encoded = vec![0.0; self.width];
                for (col, value) in values.iter().enumerate().take(self.categories.len()) {
                    if let Ok(pos) = self.categories[col].binary_search(value) {
                        encoded[self.offsets[col] + pos] = 1.0;
                    }
                }
                encoded
            })
            .collect()
    }

    fn feature_names(&self) -> Vec<String> {
        self.column_names
            .iter()
            .zip(&self.categories)
            .flat_map(|(name, cats)| cats.iter().map(move |c| format!("{name}_{c}")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|s| s.to_string()).collect())
            .collect()
    }

    #[test]
    fn one_hot_width_is_sum_of_cardinalities() {
        let data = rows(&[&["Action", "Hindi"], &["Drama", "Hindi"], &["Action", "Tamil"]]);
        let model = OneHotEncoder::new().fit(&data).unwrap();
        assert_eq!(model.n_features(), 4);
        let x = model.transform(&data);
        assert_eq!(x.len(), 3);
        for row in &x {
            assert_eq!(row.iter().sum::<f64>(), 2.0);
        }
    }

    #[test]
    fn one_hot_sorted_categories() {
        let data = rows(&[&["b"], &["a"], &["c"], &["a"]]);
        let model = OneHotEncoder::new().fit(&data).unwrap();
        assert_eq!(model.categories()[0], vec!["a", "b", "c"]);
        assert_eq!(model.transform(&data)[0], vec![0.0, 1.0, 0.0]);
    }

    #[test]
    fn unknown_value_encodes_as_zeros() {
        let model = OneHotEncoder::new().fit(&rows(&[&["x"], &["y"]])).unwrap();
        let x = model.transform(&rows(&[&["z"]]));
        assert_eq!(x[0], vec![0.0, 0.0]);
    }

    #[test]
    fn feature_names_use_columns() {
        let enc = OneHotEncoder::with_column_names(vec!["ott".into()]);
        let model = enc.fit(&rows(&[&["Netflix"], &["Prime"]])).unwrap();
        assert_eq!(model.feature_names(), vec!["ott_Netflix", "ott_Prime"]);
    }

    #[test]
    fn fit_rejects_empty_and_ragged() {
        assert_eq!(OneHotEncoder::new().fit(&[]).unwrap_err(), AlgoError::EmptyInput);
        let ragged = rows(&[&["a", "b"], &["a"]]);
        assert!(matches!(
            OneHotEncoder::new().fit(&ragged),
            Err(AlgoError::DimensionMismatch { row: 1, .. })
        ));
    }
}
