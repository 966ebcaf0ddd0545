use std::path::PathBuf;

use audience_topology::config::ClusterConfig;
use audience_topology::logging;
use audience_topology::ops;
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(
    name = "audience-topology",
    version,
    about = "Cluster survey respondents by content preferences"
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster a survey CSV and write the plot and annotated CSV
    Run {
        /// Input CSV with a header row
        input: PathBuf,
        /// Number of clusters (values below 1 mean the default of 4)
        #[arg(short, long, allow_negative_numbers = true)]
        k: Option<i64>,
        /// Directory for the generated files
        #[arg(short, long, default_value = "outputs")]
        out_dir: PathBuf,
        /// Cluster at most this many randomly chosen rows (0 disables)
        #[arg(long, allow_negative_numbers = true)]
        sample_limit: Option<i64>,
        /// Seed for sampling, k-means and t-SNE
        #[arg(long)]
        seed: Option<u64>,
        /// JSON config file (defaults to $AUDIENCE_TOPOLOGY_CONFIG)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Show how the CSV's headers map onto the required fields
    Reconcile {
        /// Input CSV with a header row
        input: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_tracing(cli.verbose);

    let (failure, result) = match cli.command {
        Commands::Run {
            input,
            k,
            out_dir,
            sample_limit,
            seed,
            config,
        } => (
            "Clustering failed",
            ClusterConfig::load(config.as_deref()).and_then(|mut base| {
                if let Some(seed) = seed {
                    base.seed = seed;
                }
                ops::op_cluster(&input, &out_dir, k, sample_limit, &base)
            }),
        ),
        Commands::Reconcile { input } => ("Reconciliation failed", ops::op_reconcile(&input)),
    };

    match result {
        Ok(output) => print_json(&output),
        Err(e) => {
            eprintln!("{failure}: {e}");
            std::process::exit(1);
        }
    }
}

fn print_json(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("Failed to serialize output: {e}");
            std::process::exit(1);
        }
    }
}
