//! Run configuration.
//!
//! Resolution order for [`ClusterConfig::load`]:
//!
//! 1. An explicit path (e.g. `--config <path>`)
//! 2. `$AUDIENCE_TOPOLOGY_CONFIG` (path to a JSON file)
//! 3. Built-in defaults
//!
//! Missing keys in a file fall back to their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::algo::kmeans::KMeans;
use crate::algo::tsne::{Tsne, TsneMethod};
use crate::error::{ClusterError, Result};
use crate::plot::{PlotOptions, MIN_SIDE};

pub const CONFIG_ENV: &str = "AUDIENCE_TOPOLOGY_CONFIG";
pub const DEFAULT_K: usize = 4;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KMeansOptions {
    pub n_init: usize,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for KMeansOptions {
    fn default() -> Self {
        let km = KMeans::default();
        Self {
            n_init: km.n_init,
            max_iter: km.max_iter,
            tol: km.tol,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneOptions {
    pub perplexity: f64,
    pub max_iter: usize,
    pub early_exaggeration: f64,
    pub exaggeration_iter: usize,
    pub method: TsneMethod,
    pub angle: f64,
}

impl Default for TsneOptions {
    fn default() -> Self {
        let t = Tsne::default();
        Self {
            perplexity: t.perplexity,
            max_iter: t.max_iter,
            early_exaggeration: t.early_exaggeration,
            exaggeration_iter: t.exaggeration_iter,
            method: t.method,
            angle: t.angle,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub k: usize,
    pub sample_limit: Option<usize>,
    /// Seed shared by sampling, k-means and t-SNE.
    pub seed: u64,
    pub kmeans: KMeansOptions,
    pub tsne: TsneOptions,
    pub plot: PlotOptions,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            sample_limit: None,
            seed: DEFAULT_SEED,
            kmeans: KMeansOptions::default(),
            tsne: TsneOptions::default(),
            plot: PlotOptions::default(),
        }
    }
}

impl ClusterConfig {
    pub fn new(k: usize, sample_limit: Option<usize>) -> Self {
        Self {
            k,
            sample_limit,
            ..Self::default()
        }
    }

    pub fn parse(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ClusterError::Config(format!("invalid JSON: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| ClusterError::io(path, e))?;
        Self::parse(&json)
    }

    /// Load from `path`, else `$AUDIENCE_TOPOLOGY_CONFIG`, else defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match std::env::var(CONFIG_ENV) {
            Ok(env_path) if !env_path.is_empty() => Self::from_file(Path::new(&env_path)),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(ClusterError::InvalidParameter("k must be at least 1".into()));
        }
        if self.sample_limit == Some(0) {
            return Err(ClusterError::InvalidParameter(
                "sample_limit must be positive".into(),
            ));
        }
        if self.kmeans.n_init == 0 || self.kmeans.max_iter == 0 {
            return Err(ClusterError::Config(
                "kmeans.n_init and kmeans.max_iter must be at least 1".into(),
            ));
        }
        if !(self.tsne.perplexity > 0.0) || !(self.tsne.early_exaggeration > 0.0) {
            return Err(ClusterError::Config(
                "tsne.perplexity and tsne.early_exaggeration must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.tsne.angle) {
            return Err(ClusterError::Config("tsne.angle must be within [0, 1]".into()));
        }
        if self.plot.validate().is_err() {
            return Err(ClusterError::Config(format!(
                "plot.width and plot.height must be at least {MIN_SIDE} pixels"
            )));
        }
        Ok(())
    }

    pub fn kmeans(&self) -> KMeans {
        KMeans {
            n_init: self.kmeans.n_init,
            max_iter: self.kmeans.max_iter,
            tol: self.kmeans.tol,
            seed: self.seed,
        }
    }

    pub fn tsne(&self) -> Tsne {
        Tsne {
            perplexity: self.tsne.perplexity,
            max_iter: self.tsne.max_iter,
            early_exaggeration: self.tsne.early_exaggeration,
            exaggeration_iter: self.tsne.exaggeration_iter,
            method: self.tsne.method,
            angle: self.tsne.angle,
            seed: self.seed,
            ..Tsne::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ClusterConfig::default();
        assert_eq!(c.k, 4);
        assert_eq!(c.seed, 42);
        assert_eq!(c.sample_limit, None);
        assert_eq!(c.kmeans.n_init, 10);
        assert_eq!(c.tsne.perplexity, 30.0);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let c = ClusterConfig::parse(r#"{"k": 6, "tsne": {"max_iter": 250}}"#).unwrap();
        assert_eq!(c.k, 6);
        assert_eq!(c.tsne.max_iter, 250);
        assert_eq!(c.tsne.perplexity, 30.0);
        assert_eq!(c.plot.width, 1350);
    }

    #[test]
    fn tsne_method_from_json() {
        let c = ClusterConfig::parse(r#"{"tsne": {"method": "exact"}}"#).unwrap();
        assert_eq!(c.tsne().method, TsneMethod::Exact);
        assert_eq!(ClusterConfig::default().tsne().method, TsneMethod::BarnesHut);

        let mut bad = ClusterConfig::default();
        bad.tsne.angle = 2.0;
        assert!(matches!(bad.validate(), Err(ClusterError::Config(_))));
    }

    #[test]
    fn invalid_json_is_config_error() {
        assert!(matches!(
            ClusterConfig::parse("{k: }"),
            Err(ClusterError::Config(_))
        ));
    }

    #[test]
    fn validate_rejects_zeroes() {
        assert!(ClusterConfig::new(0, None).validate().is_err());
        assert!(ClusterConfig::new(3, Some(0)).validate().is_err());
        let mut c = ClusterConfig::default();
        c.plot.width = 10;
        assert!(c.validate().is_err());
    }

    #[test]
    fn strategies_share_seed() {
        let mut c = ClusterConfig::default();
        c.seed = 9;
        assert_eq!(c.kmeans().seed, 9);
        assert_eq!(c.tsne().seed, 9);
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"seed": 7, "sample_limit": 50}"#).unwrap();
        let c = ClusterConfig::load(Some(&path)).unwrap();
        assert_eq!(c.seed, 7);
        assert_eq!(c.sample_limit, Some(50));
    }
}
