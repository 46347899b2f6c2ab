use std::path::PathBuf;

use anyhow::{Context, Result};
use autowebperf::connectors::sqlite::SqliteConnector;
use autowebperf::model::Test;
use autowebperf::{AwpConfig, Engine, Options, Registry};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "autowebperf",
    about = "Orchestrates recurring web-performance audits across measurement services",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file (default: $AWP_CONFIG, then ./awp.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PipelineArgs {
    /// Filter expression over Test/Result fields; repeat to AND several
    #[arg(long = "filter", global = true)]
    filters: Vec<String>,

    /// Results written per batch (0 = one write at the end)
    #[arg(long, global = true)]
    batch_update_buffer: Option<usize>,

    /// Submit each data source once for all Tests
    #[arg(long, global = true)]
    run_by_batch: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit all selected Tests and append one Result each
    Run,

    /// Run recurring Tests that are due and schedule their next trigger
    Recurring {
        /// Only arm schedules whose frequency changed; no measurements
        #[arg(long)]
        activate_only: bool,
    },

    /// Poll pending Results and update them
    Retrieve,

    /// Load Tests from a JSON array file into the SQLite store
    ImportTests {
        /// JSON file holding an array of Tests
        #[arg(long)]
        file: PathBuf,
    },
}

fn init_tracing(config: &AwpConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AwpConfig::load(path)?,
        None => AwpConfig::load_or_default(),
    };
    init_tracing(&config);

    if let Commands::ImportTests { file } = &cli.command {
        let raw = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let tests: Vec<Test> = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse Tests from {}", file.display()))?;
        let connector = SqliteConnector::open(&config.connector.path)?;
        let ids = connector.insert_tests(&tests).await?;
        tracing::info!(count = ids.len(), path = %config.connector.path.display(), "Imported tests");
        println!("Imported {} tests.", ids.len());
        return Ok(());
    }

    let registry = Registry::with_builtins();
    let engine = Engine::from_config(&config, &registry).await?;

    let options = Options {
        filters: cli.pipeline.filters,
        run_by_batch: cli.pipeline.run_by_batch,
        batch_update_buffer: cli.pipeline.batch_update_buffer,
        activate_only: matches!(cli.command, Commands::Recurring { activate_only: true }),
    };

    let summary = match cli.command {
        Commands::Run => engine.run(&options).await?,
        Commands::Recurring { .. } => engine.recurring(&options).await?,
        Commands::Retrieve => engine.retrieve(&options).await?,
        Commands::ImportTests { .. } => return Ok(()),
    };

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
