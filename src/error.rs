//! Error types for reconciliation and the clustering pipeline.
//!
//! Every error renders as plain text suitable for showing to whoever
//! uploaded the table: no backtraces, no debug formatting.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::reconcile::ReconciliationError;

/// Top-level error returned by a clustering run.
#[derive(Error, Debug)]
pub enum ClusterError {
    /// Required fields could not be mapped onto the table's headers.
    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    /// Fewer usable rows than `max(2, k)`.
    #[error("Not enough rows ({rows}) for k={k}. Reduce k or provide more data.")]
    InsufficientData { rows: usize, k: usize },

    /// A caller-supplied parameter is out of range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The input file parsed as CSV but is not a usable table.
    #[error("Invalid table '{path}': {message}")]
    InvalidTable { path: PathBuf, message: String },

    /// Encoding, clustering or embedding failed.
    #[error("Clustering pipeline failed during {stage}: {source}")]
    Pipeline {
        stage: &'static str,
        #[source]
        source: AlgoError,
    },

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to render plot: {0}")]
    Plot(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl ClusterError {
    pub fn pipeline(stage: &'static str, source: AlgoError) -> Self {
        Self::Pipeline { stage, source }
    }

    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_table(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidTable {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True for failures caused by the uploaded data rather than the system.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Reconciliation(_)
                | Self::InsufficientData { .. }
                | Self::InvalidParameter(_)
                | Self::InvalidTable { .. }
        )
    }
}

/// Numeric failure inside one of the algorithm strategies.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlgoError {
    #[error("input matrix is empty")]
    EmptyInput,

    #[error("row {row} has {found} features, expected {expected}")]
    DimensionMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("{0}")]
    InvalidParameter(String),

    #[error("non-finite value produced by {0}")]
    NonFinite(&'static str),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_data_names_rows_and_k() {
        let err = ClusterError::InsufficientData { rows: 3, k: 4 };
        let msg = err.to_string();
        assert!(msg.contains("(3)"));
        assert!(msg.contains("k=4"));
        assert!(err.is_validation());
    }

    #[test]
    fn pipeline_error_carries_cause() {
        let err = ClusterError::pipeline("clustering", AlgoError::EmptyInput);
        assert_eq!(
            err.to_string(),
            "Clustering pipeline failed during clustering: input matrix is empty"
        );
        assert!(!err.is_validation());
        assert!(std::error::Error::source(&err).is_some());
    }
}
