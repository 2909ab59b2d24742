use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use soldb_core::parse_lines;
use soldb_load::{BatchSummary, LoadPolicy, Loader};
use soldb_store::{MemoryStore, SqliteStore};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "soldb")]
#[command(about = "Load scraped folding-puzzle solution records into the solution database")]
struct Cli {
    /// File containing one scraped solution record per line, in json
    solutions: PathBuf,

    /// Database to load into
    #[arg(long, env = "SOLDB_DATABASE_URL", default_value = "sqlite://soldb.db?mode=rwc")]
    database_url: String,

    /// Abort the whole batch on the first invalid record
    #[arg(long)]
    strict: bool,

    /// Parse and map records without touching the database
    #[arg(long)]
    dry_run: bool,

    /// Log per-record detail
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if !cli.solutions.exists() {
        bail!("solutions file {} does not exist", cli.solutions.display());
    }

    let policy = if cli.strict {
        LoadPolicy::Strict
    } else {
        LoadPolicy::Lenient
    };

    let file = File::open(&cli.solutions)
        .with_context(|| format!("opening {}", cli.solutions.display()))?;
    let records = parse_lines(BufReader::new(file));

    let summary = if cli.dry_run {
        let mut loader = Loader::new(MemoryStore::new());
        loader.load_batch(records, policy).await?
    } else {
        let store = SqliteStore::connect(&cli.database_url)
            .await
            .with_context(|| format!("connecting to {}", cli.database_url))?;
        store.init_schema().await.context("initializing schema")?;
        let mut loader = Loader::new(store);
        loader.load_batch(records, policy).await?
    };

    info!(path = %cli.solutions.display(), "finished processing solutions file");
    print_summary(&cli.solutions, &summary);
    Ok(())
}

fn print_summary(path: &PathBuf, summary: &BatchSummary) {
    println!(
        "finished processing {}: committed={} duplicate={} invalid={} failed={} parse_errors={}",
        path.display(),
        summary.committed,
        summary.skipped_duplicate,
        summary.skipped_invalid,
        summary.failed,
        summary.parse_errors,
    );
}
