use std::fs;
use std::path::{Path, PathBuf};

use audience_topology::config::ClusterConfig;
use audience_topology::ops;

fn write_csv(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("upload.csv");
    fs::write(&path, body).unwrap();
    path
}

fn survey(rows: usize) -> String {
    let mut csv = String::from("Movie Genre,Series Genre Top1,OTT,Language Top1\n");
    let movies = ["Action", "Drama", "Comedy"];
    let series = ["Crime", "Sitcom"];
    let otts = ["Netflix", "Prime", "Hotstar"];
    let langs = ["Hindi", "Tamil"];
    for i in 0..rows {
        csv.push_str(&format!(
            "{},{},{},{}\n",
            movies[i % 3],
            series[i % 2],
            otts[(i / 2) % 3],
            langs[(i / 3) % 2]
        ));
    }
    csv
}

fn fast_config() -> ClusterConfig {
    let mut config = ClusterConfig::default();
    config.tsne.max_iter = 250;
    config.tsne.exaggeration_iter = 100;
    config.plot.width = 300;
    config.plot.height = 240;
    config
}

#[test]
fn ops_reconcile_reports_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(dir.path(), &survey(5));
    let result = ops::op_reconcile(&input).unwrap();

    assert_eq!(result["rows"], 5);
    assert_eq!(result["columns"].as_array().unwrap().len(), 4);
    assert_eq!(result["mapping"]["movie_genre_top1"]["column"], "Movie Genre");
    assert_eq!(result["mapping"]["ott_top1"]["column"], "OTT");
    assert_eq!(result["mapping"]["content_lang_top1"]["column"], "Language Top1");
}

#[test]
fn ops_cluster_returns_basenames() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(dir.path(), &survey(24));
    let out = dir.path().join("outputs");
    let result = ops::op_cluster(&input, &out, Some(3), None, &fast_config()).unwrap();

    assert_eq!(result["k"], 3);
    assert_eq!(
        result["notes"],
        "Auto-mapped columns and applied one-hot encoding; KMeans clustering."
    );
    let plot = result["plot_path"].as_str().unwrap();
    let csv = result["csv_path"].as_str().unwrap();
    assert!(!plot.contains('/'));
    assert!(out.join(plot).exists());
    assert!(out.join(csv).exists());
    assert_eq!(result["rows_clustered"], 24);
    assert_eq!(result["summary"].as_object().unwrap().len(), 3);
}

#[test]
fn ops_cluster_coerces_bad_k_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(dir.path(), &survey(20));
    let result = ops::op_cluster(&input, dir.path(), Some(0), Some(-5), &fast_config()).unwrap();
    assert_eq!(result["k"], 4);
    assert_eq!(result["sampled"], false);
}

#[test]
fn ops_cluster_validation_error_body() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(dir.path(), &survey(3));
    let err = ops::op_cluster(&input, dir.path(), Some(4), None, &fast_config()).unwrap_err();
    let body = ops::error_to_json(&err);
    assert_eq!(body["kind"], "validation");
    assert_eq!(
        body["error"],
        "Not enough rows (3) for k=4. Reduce k or provide more data."
    );
}

#[test]
fn ops_reconcile_failure_lists_fields() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_csv(dir.path(), "id,score\n1,2\n");
    let err = ops::op_reconcile(&input).unwrap_err();
    let body = ops::error_to_json(&err);
    assert_eq!(body["kind"], "validation");
    let msg = body["error"].as_str().unwrap();
    assert!(msg.starts_with("Missing required columns or ambiguous names."));
    assert!(msg.contains("series_genre_top1"));
}
