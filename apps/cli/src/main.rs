//! `fh`: command-line client for FileHeap datasets.

mod app;
mod config;
mod paths;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fh", about = "Move files in and out of FileHeap datasets", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Copy a local directory into a dataset, or a dataset into a directory
    Cp {
        /// Source: a local path or fh://<dataset>/<path>
        source: String,
        /// Target: a local path or fh://<dataset>/<path>
        target: String,
        /// Batches in flight (overrides FILEHEAP_CONCURRENCY)
        #[arg(short, long)]
        concurrency: Option<usize>,
    },
    /// Create an empty dataset
    Mk,
    /// Make a dataset read-only
    Seal {
        /// Dataset ID or fh://<dataset>
        dataset: String,
    },
    /// Delete a dataset, or the files under fh://<dataset>/<prefix>
    Rm {
        /// Dataset ID or fh://<dataset>[/<prefix>]
        target: String,
    },
    /// List files under fh://<dataset>/<prefix>
    Ls {
        /// fh://<dataset>[/<prefix>]
        path: String,
        /// Files fetched per listing request
        #[arg(long)]
        page_size: Option<usize>,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::Config::load()?;

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(cli.command, config))
}
