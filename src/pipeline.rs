//! The clustering pipeline: reconcile, project, sample, encode, cluster,
//! score, embed, then write the annotated table and the scatter plot.
//!
//! [`Pipeline`] is generic over the four algorithm seams in [`crate::algo`];
//! [`run_clustering`] wires the default strategies (one-hot, k-means,
//! silhouette, t-SNE).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::algo::encoding::OneHotEncoder;
use crate::algo::kmeans::KMeans;
use crate::algo::sampling;
use crate::algo::silhouette::Silhouette;
use crate::algo::tsne::Tsne;
use crate::algo::{Clusterer, Embedder, Encoder, FittedClusterer, FittedEncoder, QualityScorer};
use crate::config::ClusterConfig;
use crate::error::{ClusterError, Result};
use crate::plot::{self, PlotOptions};
use crate::reconcile::{self, Mapping, RequiredField};
use crate::table::Table;

/// Fixed description of what a run does.
pub const NOTES: &str = "Auto-mapped columns and applied one-hot encoding; KMeans clustering.";

/// Column added to the annotated table.
pub const CLUSTER_COLUMN: &str = "cluster";

/// Reported when the silhouette is undefined or could not be computed.
pub const SILHOUETTE_SENTINEL: f64 = -1.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    /// Most frequent value per required field.
    pub modes: BTreeMap<RequiredField, String>,
    pub count: usize,
    /// Share of clustered rows, rounded to 3 decimals.
    pub pct: f64,
}

/// Everything computed for one table, before any file is written.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub mapping: Mapping,
    /// Source row index of each clustered row.
    pub row_indices: Vec<usize>,
    pub sampled: bool,
    pub n_features: usize,
    pub labels: Vec<usize>,
    pub silhouette: f64,
    pub embedding: Vec<[f64; 2]>,
    pub summary: BTreeMap<usize, ClusterSummary>,
}

/// Result of a full run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterRun {
    pub silhouette: f64,
    pub k: usize,
    pub plot: PathBuf,
    pub clusters_csv: PathBuf,
    pub notes: String,
    pub mapping: Mapping,
    pub rows_total: usize,
    pub rows_clustered: usize,
    pub sampled: bool,
    pub summary: BTreeMap<usize, ClusterSummary>,
    #[serde(skip)]
    pub labels: Vec<usize>,
}

pub struct Pipeline<E, C, Q, M> {
    pub encoder: E,
    pub clusterer: C,
    pub scorer: Q,
    pub embedder: M,
    pub plot: PlotOptions,
    /// Seed for row sampling.
    pub seed: u64,
}

impl Pipeline<OneHotEncoder, KMeans, Silhouette, Tsne> {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            encoder: OneHotEncoder::with_column_names(
                RequiredField::ALL
                    .iter()
                    .map(|f| f.canonical_name().to_string())
                    .collect(),
            ),
            clusterer: config.kmeans(),
            scorer: Silhouette,
            embedder: config.tsne(),
            plot: config.plot.clone(),
            seed: config.seed,
        }
    }
}

impl Default for Pipeline<OneHotEncoder, KMeans, Silhouette, Tsne> {
    fn default() -> Self {
        Self::from_config(&ClusterConfig::default())
    }
}

impl<E, C, Q, M> Pipeline<E, C, Q, M>
where
    E: Encoder,
    C: Clusterer,
    Q: QualityScorer,
    M: Embedder,
{
    /// Compute labels, score, embedding and summary for `table`.
    pub fn analyze(&self, table: &Table, k: usize, sample_limit: Option<usize>) -> Result<Analysis> {
        if k == 0 {
            return Err(ClusterError::InvalidParameter("k must be at least 1".into()));
        }
        if sample_limit == Some(0) {
            return Err(ClusterError::InvalidParameter(
                "sample_limit must be positive".into(),
            ));
        }

        let mapping = reconcile::reconcile(&table.headers)?;
        let mut work = table.project(&mapping.columns())?;

        let (row_indices, sampled) = match sampling::limit_rows(work.len(), sample_limit, self.seed) {
            Some(indices) => {
                work = indices.iter().map(|&i| work[i].clone()).collect();
                (indices, true)
            }
            None => ((0..work.len()).collect(), false),
        };

        let rows = work.len();
        if rows < k.max(2) {
            return Err(ClusterError::InsufficientData { rows, k });
        }

        let encoder = self
            .encoder
            .fit(&work)
            .map_err(|e| ClusterError::pipeline("encoding", e))?;
        let x = encoder.transform(&work);
        let n_features = encoder.feature_names().len();
        debug!(rows, n_features, sampled, "encoded work matrix");

        let model = self
            .clusterer
            .fit(&x, k)
            .map_err(|e| ClusterError::pipeline("clustering", e))?;
        let labels = model.labels().to_vec();
        debug!(inertia = model.inertia(), "clustered");

        let silhouette = self.quality(&x, &labels, k);

        let embedding = self
            .embedder
            .fit_transform(&x)
            .map_err(|e| ClusterError::pipeline("embedding", e))?;

        let summary = summarize(&work, &labels);

        Ok(Analysis {
            mapping,
            row_indices,
            sampled,
            n_features,
            labels,
            silhouette,
            embedding,
            summary,
        })
    }

    fn quality(&self, x: &[Vec<f64>], labels: &[usize], k: usize) -> f64 {
        let distinct = labels.iter().collect::<BTreeSet<_>>().len();
        if k <= 1 || distinct <= 1 {
            return SILHOUETTE_SENTINEL;
        }
        match self.scorer.score(x, labels) {
            Ok(score) => score,
            Err(e) => {
                warn!(error = %e, "silhouette unavailable, reporting sentinel");
                SILHOUETTE_SENTINEL
            }
        }
    }

    /// Analyze `table` and write the plot and annotated CSV into `out_dir`.
    pub fn run(
        &self,
        table: &Table,
        k: usize,
        sample_limit: Option<usize>,
        out_dir: &Path,
    ) -> Result<ClusterRun> {
        self.plot.validate()?;
        info!(rows = table.len(), k, ?sample_limit, "starting clustering run");
        let analysis = self.analyze(table, k, sample_limit)?;

        std::fs::create_dir_all(out_dir).map_err(|e| ClusterError::io(out_dir, e))?;
        let stamp = chrono::Utc::now().timestamp_millis();
        let plot_path = out_dir.join(format!("plot_tsne_{stamp}.png"));
        let csv_path = out_dir.join(format!("clusters_{stamp}.csv"));

        plot::save_scatter(&analysis.embedding, &analysis.labels, k, &self.plot, &plot_path)?;

        let annotated = table
            .select_rows(&analysis.row_indices)
            .with_labels(CLUSTER_COLUMN, &analysis.labels)?;
        annotated.write_csv(&csv_path)?;

        info!(
            silhouette = analysis.silhouette,
            rows_clustered = analysis.labels.len(),
            plot = %plot_path.display(),
            csv = %csv_path.display(),
            "clustering run finished"
        );

        Ok(ClusterRun {
            silhouette: analysis.silhouette,
            k,
            plot: plot_path,
            clusters_csv: csv_path,
            notes: NOTES.to_string(),
            mapping: analysis.mapping,
            rows_total: table.len(),
            rows_clustered: analysis.labels.len(),
            sampled: analysis.sampled,
            summary: analysis.summary,
            labels: analysis.labels,
        })
    }
}

/// Per-cluster modes, counts and shares over the clustered rows. Work rows
/// hold the required fields in [`RequiredField::ALL`] order.
pub fn summarize(work: &[Vec<String>], labels: &[usize]) -> BTreeMap<usize, ClusterSummary> {
    let total = labels.len();
    let mut members: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        members.entry(label).or_default().push(row);
    }

    members
        .into_iter()
        .map(|(label, rows)| {
            let modes = RequiredField::ALL
                .iter()
                .enumerate()
                .map(|(col, &field)| {
                    let values = rows.iter().map(|&r| work[r][col].as_str());
                    (field, mode(values).unwrap_or("NA").to_string())
                })
                .collect();
            let count = rows.len();
            let summary = ClusterSummary {
                modes,
                count,
                pct: round3(count as f64 / total as f64),
            };
            (label, summary)
        })
        .collect()
}

/// Most frequent value; ties go to the value seen first.
pub fn mode<'a>(values: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut order: Vec<(&str, usize)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for v in values {
        match index.get(v) {
            Some(&i) => order[i].1 += 1,
            None => {
                index.insert(v, order.len());
                order.push((v, 1));
            }
        }
    }
    let mut best: Option<(&str, usize)> = None;
    for (v, c) in order {
        if best.map_or(true, |(_, bc)| c > bc) {
            best = Some((v, c));
        }
    }
    best.map(|(v, _)| v)
}

fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Run the default pipeline on a CSV file.
pub fn run_clustering(
    input: &Path,
    k: usize,
    out_dir: &Path,
    sample_limit: Option<usize>,
) -> Result<ClusterRun> {
    run_with_config(input, out_dir, &ClusterConfig::new(k, sample_limit))
}

pub fn run_with_config(input: &Path, out_dir: &Path, config: &ClusterConfig) -> Result<ClusterRun> {
    config.validate()?;
    let table = Table::from_path(input)?;
    Pipeline::from_config(config).run(&table, config.k, config.sample_limit, out_dir)
}
