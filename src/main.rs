mod config;
mod core;
mod error;
mod features;
mod models;
mod scoring;
mod store;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::core::pipeline::{self, ScoringBatch};
use crate::store::{LoadReport, RunReport};

#[derive(Parser)]
#[command(name = "walletrisk")]
#[command(about = "Batch risk scoring for Ethereum wallets")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every wallet in a transaction export
    Score {
        /// Transaction CSV export
        #[arg(long)]
        transactions: PathBuf,
        /// Wallet list; listed wallets without transactions are still scored
        #[arg(long)]
        wallets: Option<PathBuf>,
        #[arg(long, default_value = "scores.csv")]
        output: PathBuf,
        /// Per-component breakdown CSV
        #[arg(long)]
        breakdown: Option<PathBuf>,
        /// JSON run report
        #[arg(long)]
        report: Option<PathBuf>,
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
        #[arg(long)]
        seed: Option<u64>,
        /// Abort the whole run after this many seconds
        #[arg(long)]
        deadline_secs: Option<u64>,
        #[arg(long)]
        workers: Option<usize>,
        /// Write only wallet_id,score
        #[arg(long)]
        no_category: bool,
    },
    /// Write the raw feature matrix without scoring
    Features {
        #[arg(long)]
        transactions: PathBuf,
        #[arg(long)]
        wallets: Option<PathBuf>,
        #[arg(long, default_value = "features.csv")]
        output: PathBuf,
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Validate a config file and print the effective settings
    CheckConfig {
        #[arg(long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("walletrisk=info".parse()?))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Score {
            transactions,
            wallets,
            output,
            breakdown,
            report,
            config,
            seed,
            deadline_secs,
            workers,
            no_category,
        } => {
            let mut config = load_config(&config)?;
            if let Some(seed) = seed {
                config.run.seed = seed;
            }
            if let Some(workers) = workers {
                config.run.workers = workers;
            }
            if deadline_secs.is_some() {
                config.run.deadline_secs = deadline_secs;
            }

            let (batch, load) = load_batch(&transactions, wallets.as_deref(), &config)?;
            let deadline = config.run.deadline_secs.map(Duration::from_secs);
            let run = pipeline::run_with_deadline(batch, &config, deadline)
                .await
                .context("Scoring run failed, no scores written")?;

            store::write_file(&output, |w| store::write_scores(w, &run.records(), !no_category))
                .with_context(|| format!("Failed to write {}", output.display()))?;
            if let Some(path) = breakdown {
                store::write_file(&path, |w| store::write_breakdown(w, &run.scores))
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            if let Some(path) = report {
                let summary = RunReport::new(&run, &load);
                store::write_file(&path, |w| summary.write_json(w))
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            tracing::info!("Scored {} wallets into {}", run.scores.len(), output.display());
        }
        Commands::Features {
            transactions,
            wallets,
            output,
            config,
        } => {
            let config = load_config(&config)?;
            let (batch, _) = load_batch(&transactions, wallets.as_deref(), &config)?;
            let matrix = pipeline::extract_features(batch, &config)
                .await
                .context("Feature extraction failed")?;
            store::write_file(&output, |w| store::write_features(w, &matrix))
                .with_context(|| format!("Failed to write {}", output.display()))?;
        }
        Commands::CheckConfig { config } => {
            let config = load_config(&config)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = Config::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn load_batch(
    transactions: &Path,
    wallets: Option<&Path>,
    config: &Config,
) -> anyhow::Result<(ScoringBatch, LoadReport)> {
    let (records, load) = store::load_transactions(transactions, &config.input)
        .with_context(|| format!("Failed to read transactions from {}", transactions.display()))?;
    let wallets = match wallets {
        Some(path) => store::load_wallets(path)
            .with_context(|| format!("Failed to read wallets from {}", path.display()))?,
        None => Vec::new(),
    };
    Ok((
        ScoringBatch {
            transactions: records,
            wallets,
        },
        load,
    ))
}
