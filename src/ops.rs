//! Shared operation wrappers for outer interfaces (CLI, upload handlers).
//!
//! Each `op_*` function is a synchronous wrapper around the pipeline that
//! takes loosely typed request parameters and returns `serde_json::Value`,
//! so callers need no knowledge of the library types.

use std::path::Path;

use serde_json::{json, Value};

use crate::config::{ClusterConfig, DEFAULT_K};
use crate::error::ClusterError;
use crate::pipeline::{self, ClusterRun};
use crate::reconcile;
use crate::table::Table;

// ── Parameter coercion ──────────────────────────────────────────────────────

/// Cluster count from a request: anything below 1 (or absent) means the default.
pub fn coerce_k(k: Option<i64>) -> usize {
    match k {
        Some(k) if k >= 1 => k as usize,
        _ => DEFAULT_K,
    }
}

/// Sample limit from a request: zero or negative disables sampling.
pub fn coerce_sample_limit(limit: Option<i64>) -> Option<usize> {
    match limit {
        Some(n) if n > 0 => Some(n as usize),
        _ => None,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ── Operations ──────────────────────────────────────────────────────────────

/// Map the required fields onto the headers of the CSV at `input`.
pub fn op_reconcile(input: &Path) -> Result<Value, ClusterError> {
    let table = Table::from_path(input)?;
    let mapping = reconcile::reconcile(&table.headers)?;
    Ok(json!({
        "columns": table.headers,
        "rows": table.len(),
        "mapping": mapping,
    }))
}

/// Run the clustering pipeline. Artifact paths are reported as bare file
/// names; they live in `out_dir`.
pub fn op_cluster(
    input: &Path,
    out_dir: &Path,
    k: Option<i64>,
    sample_limit: Option<i64>,
    base: &ClusterConfig,
) -> Result<Value, ClusterError> {
    let mut config = base.clone();
    if k.is_some() {
        config.k = coerce_k(k);
    }
    if sample_limit.is_some() {
        config.sample_limit = coerce_sample_limit(sample_limit);
    }
    let run = pipeline::run_with_config(input, out_dir, &config)?;
    Ok(run_to_json(&run))
}

pub fn run_to_json(run: &ClusterRun) -> Value {
    json!({
        "silhouette": run.silhouette,
        "k": run.k,
        "plot_path": file_name(&run.plot),
        "csv_path": file_name(&run.clusters_csv),
        "notes": run.notes,
        "mapping": run.mapping,
        "rows_total": run.rows_total,
        "rows_clustered": run.rows_clustered,
        "sampled": run.sampled,
        "summary": run.summary,
    })
}

/// Error body for a failed operation. `kind` is `"validation"` for problems
/// with the uploaded data or parameters and `"failure"` otherwise.
pub fn error_to_json(err: &ClusterError) -> Value {
    let kind = if err.is_validation() {
        "validation"
    } else {
        "failure"
    };
    json!({ "error": err.to_string(), "kind": kind })
}
