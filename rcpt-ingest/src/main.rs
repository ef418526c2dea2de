//! rcpt-ingest - Receipt Ingest CLI
//!
//! Runs one receipt image through the ingest pipeline and prints the outcome
//! as JSON. Ctrl-C cancels the submission cooperatively.

use anyhow::{Context, Result};
use clap::Parser;
use rcpt_common::config::{load_default_toml_config, load_toml_config, TomlConfig};
use rcpt_common::events::EventBus;
use rcpt_ingest::db::{init_database_pool, SqliteReceiptStore};
use rcpt_ingest::{PipelineConfig, ProcessingOrchestrator, RawSubmission};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Submit a receipt image for OCR ingest
#[derive(Debug, Parser)]
#[command(name = "rcpt-ingest", version, about)]
struct Args {
    /// Receipt image file
    image: PathBuf,

    /// Owning user identifier
    #[arg(long)]
    owner: String,

    /// Root folder (database location)
    #[arg(long)]
    root_folder: Option<String>,

    /// Explicit TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match &args.config {
        Some(path) => load_toml_config(path)?,
        None => load_default_toml_config()?,
    };

    init_tracing(&toml_config)?;

    info!("Starting rcpt-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Step 1: Resolve root folder and database
    let root_folder = rcpt_common::config::resolve_root_folder(
        args.root_folder.as_deref(),
        rcpt_common::config::ROOT_FOLDER_ENV,
        &toml_config,
    );
    let db_path = rcpt_common::config::database_path(&root_folder, &toml_config);
    info!("Database: {}", db_path.display());

    let pool = init_database_pool(&db_path).await?;

    // Step 2: Resolve providers and thresholds
    let pipeline_config = PipelineConfig::from_toml(&toml_config)?;
    let event_bus = EventBus::new(pipeline_config.event_bus_capacity);
    let store = Arc::new(SqliteReceiptStore::new(pool));
    let orchestrator = ProcessingOrchestrator::from_config(&pipeline_config, store, event_bus);

    // Step 3: Read the image and wire Ctrl-C to cancellation
    let content = tokio::fs::read(&args.image)
        .await
        .with_context(|| format!("Failed to read {}", args.image.display()))?;
    let filename = args
        .image
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling submission");
            ctrl_c_token.cancel();
        }
    });

    // Step 4: Process
    let submission = RawSubmission::new(args.owner, filename, content);
    let output = match orchestrator.process_submission(submission, cancel).await {
        Ok(receipt) => serde_json::json!({ "outcome": "processed", "receipt": receipt }),
        Err(outcome) => serde_json::to_value(&outcome)?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}

/// Install the global subscriber: TOML level, overridable by `RUST_LOG`
fn init_tracing(toml_config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&toml_config.logging.level));

    match &toml_config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        None => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}
