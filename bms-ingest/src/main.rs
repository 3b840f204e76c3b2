//! bms-ingest - BMS screenshot ingestion
//!
//! Reads a ZIP container or a directory of BMS app screenshots, extracts the
//! readings through the vision service, verifies them and stores one record
//! per unique image.
//!
//! Ctrl-C stops dequeuing new items; in-flight extractions finish and the
//! summary still prints.

use anyhow::{Context, Result};
use bms_common::events::{EventBus, IngestEvent};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use bms_ingest::config::{CliOverrides, IngestConfig, MODULE_NAME};
use bms_ingest::db::{init_database_pool, RecordRepository, SqliteRecordRepository};
use bms_ingest::extractors::{HttpVisionClient, OpenMeteoClient};
use bms_ingest::models::{BatchSummary, ItemOutcome};
use bms_ingest::workflow::{BatchIngestionPipeline, ScreenshotProcessor};

/// Progress events buffered per subscriber
const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Parser)]
#[command(name = "bms-ingest", version, about = "Verify and ingest BMS screenshots")]
struct Cli {
    /// ZIP container or directory of screenshots
    input: PathBuf,

    /// TOML config file
    #[arg(long, env = "BMS_CONFIG")]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    /// Database file (overrides the root folder)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Vision extraction endpoint
    #[arg(long)]
    vision_endpoint: Option<String>,

    /// Vision extraction API key
    #[arg(long)]
    vision_api_key: Option<String>,

    /// Target number of concurrent extractions
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the batch summary as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| bms_common::config::default_config_path(MODULE_NAME))
        .unwrap_or_else(|| PathBuf::from(format!("{}.toml", MODULE_NAME)));
    // Config load warnings are emitted before the real subscriber exists
    let bootstrap = tracing_subscriber::fmt().with_env_filter(EnvFilter::new("warn")).finish();
    let toml_config = tracing::subscriber::with_default(bootstrap, || {
        bms_common::config::load_toml_config(&config_path)
    });

    // RUST_LOG wins over [logging] level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(toml_config.logging.filter_directive()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bms-ingest {}", env!("CARGO_PKG_VERSION"));

    let overrides = CliOverrides {
        vision_endpoint: cli.vision_endpoint.clone(),
        vision_api_key: cli.vision_api_key.clone(),
        target_concurrency: cli.concurrency,
        database_path: cli.database.clone(),
        root_folder: cli.root_folder.clone(),
    };
    let config = IngestConfig::resolve(&overrides, &toml_config, &config_path)
        .with_context(|| format!("Failed to resolve configuration ({})", config_path.display()))?;

    info!("Database: {}", config.database_path.display());
    let pool = init_database_pool(&config.database_path).await?;
    let repository: Arc<dyn RecordRepository> = Arc::new(SqliteRecordRepository::new(pool, config.max_lock_wait_ms));

    let vision = HttpVisionClient::new(config.vision.clone())?;
    info!(endpoint = %config.vision.endpoint, "Vision client ready");

    let mut processor = ScreenshotProcessor::new(Arc::new(vision), Arc::clone(&repository), config.physics.clone());
    if let Some(site) = config.site {
        processor = processor.with_weather(Arc::new(OpenMeteoClient::new()?), site);
        info!(latitude = site.latitude, longitude = site.longitude, "Weather enrichment enabled");
    }

    let event_bus = EventBus::new(EVENT_CAPACITY);
    let progress = tokio::spawn(log_progress(event_bus.subscribe()));

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight screenshots");
            ctrl_c_token.cancel();
        }
    });

    let pipeline = BatchIngestionPipeline::new(processor, repository, config.executor.clone()).with_events(event_bus.clone());

    let summary = if cli.input.is_dir() {
        pipeline.process_directory_with_cancel(&cli.input, cancel).await?
    } else {
        pipeline.process_zip_with_cancel(&cli.input, cancel).await?
    };

    drop(pipeline);
    drop(event_bus);
    let _ = progress.await;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }

    Ok(())
}

/// Log progress events until the bus closes
async fn log_progress(mut rx: broadcast::Receiver<IngestEvent>) {
    loop {
        match rx.recv().await {
            Ok(IngestEvent::ItemCompleted {
                file_name,
                outcome,
                completed,
                total,
                ..
            }) => info!("[{}/{}] {} {}", completed, total, outcome, file_name),
            Ok(IngestEvent::ConcurrencyChanged { from, to, reason, .. }) => {
                info!(from, to, %reason, "Concurrency changed")
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Progress log fell behind"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    println!("Batch {}", summary.batch_id);
    println!("  total:     {}", summary.total);
    println!("  processed: {}", summary.processed);
    println!("  updated:   {}", summary.updated);
    println!("  skipped:   {}", summary.skipped);
    println!("  rejected:  {}", summary.rejected);
    println!("  errored:   {}", summary.errored);
    println!("  duration:  {} ms", summary.duration_ms);

    for item in summary.items_where(|o| matches!(o, ItemOutcome::Rejected { .. } | ItemOutcome::Failed { .. })) {
        match &item.outcome {
            ItemOutcome::Rejected { reason } => println!("  rejected {}: {}", item.file_name, reason),
            ItemOutcome::Failed { error } => println!("  failed {}: {}", item.file_name, error),
            _ => {}
        }
    }
}
