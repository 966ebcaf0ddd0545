//! Audience segmentation for survey exports: map loosely named CSV columns
//! onto four preference fields, one-hot encode them, cluster with k-means,
//! score with the silhouette coefficient and plot a t-SNE embedding.

pub mod algo;
pub mod config;
pub mod error;
pub mod logging;
pub mod ops;
pub mod pipeline;
pub mod plot;
pub mod reconcile;
pub mod table;

pub use config::ClusterConfig;
pub use error::{AlgoError, ClusterError, Result};
pub use pipeline::{run_clustering, run_with_config, ClusterRun, ClusterSummary, Pipeline};
pub use reconcile::{reconcile, Mapping, ReconciliationError, RequiredField};
pub use table::Table;
