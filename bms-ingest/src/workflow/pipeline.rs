//! Batch Ingestion Pipeline
//!
//! Turns a batch of screenshot files into stored, classified records.
//!
//! # Phases
//! - **Phase 1**: Hash and timestamp every file up front (CPU-bound, rayon)
//! - **Phase 2**: Partition into rejected / skipped / to-process with a
//!   single prefetch query and a per-batch [`DeduplicationIndex`]
//! - **Phase 3**: Run the to-process items through the adaptive executor
//! - **Phase 4**: Aggregate a [`BatchSummary`] in input order
//!
//! # Error Handling
//! Per-item failures end up in the summary. Only setup failures (opening
//! the container, reading the directory, the prefetch query) abort a batch.
//!
//! # Example
//! ```rust,ignore
//! let pipeline = BatchIngestionPipeline::new(processor, repository, ExecutorConfig::default());
//! let summary = pipeline.process_zip(Path::new("january.zip")).await?;
//! println!("{} processed, {} rejected", summary.processed, summary.rejected);
//! ```

use bms_common::events::{EventBus, IngestEvent};
use chrono::{NaiveDateTime, Utc};
use rayon::prelude::*;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::screenshot_processor::{ProcessError, ScreenshotProcessor, WorkItem};
use crate::db::RecordRepository;
use crate::error::{IngestError, Result};
use crate::models::{BatchSummary, ItemOutcome, ItemReport};
use crate::services::{
    content_hash, extract_timestamp, AdaptiveConcurrencyExecutor, Admission, DeduplicationIndex, ExecutorConfig,
    TaskOutcome, TimeError,
};

/// macOS resource-fork folder found in many ZIPs
const MACOS_METADATA_PREFIX: &str = "__MACOSX/";

/// One input file
#[derive(Debug, Clone)]
pub struct BatchFile {
    /// Name as found in the container (may include directories)
    pub name: String,
    pub bytes: Vec<u8>,
}

impl BatchFile {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

/// File after phase 1
struct PreparedFile {
    name: String,
    bytes: Arc<[u8]>,
    content_hash: String,
    timestamp: std::result::Result<NaiveDateTime, TimeError>,
}

/// Batch Ingestion Pipeline
pub struct BatchIngestionPipeline {
    processor: Arc<ScreenshotProcessor>,
    repository: Arc<dyn RecordRepository>,
    executor_config: ExecutorConfig,
    events: Option<EventBus>,
}

impl BatchIngestionPipeline {
    pub fn new(
        processor: ScreenshotProcessor,
        repository: Arc<dyn RecordRepository>,
        executor_config: ExecutorConfig,
    ) -> Self {
        Self {
            processor: Arc::new(processor),
            repository,
            executor_config,
            events: None,
        }
    }

    /// Broadcast progress on an event bus
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    /// Process every image in a ZIP container
    pub async fn process_zip(&self, path: &Path) -> Result<BatchSummary> {
        self.process_zip_with_cancel(path, CancellationToken::new()).await
    }

    pub async fn process_zip_with_cancel(&self, path: &Path, cancel: CancellationToken) -> Result<BatchSummary> {
        let path_buf = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || read_zip(&path_buf))
            .await
            .map_err(|e| IngestError::Internal(format!("Archive read task failed: {}", e)))??;
        info!(path = %path.display(), files = files.len(), "Loaded ZIP container");
        self.process_with_cancel(files, cancel).await
    }

    /// Process every file below a directory
    pub async fn process_directory(&self, path: &Path) -> Result<BatchSummary> {
        self.process_directory_with_cancel(path, CancellationToken::new()).await
    }

    pub async fn process_directory_with_cancel(&self, path: &Path, cancel: CancellationToken) -> Result<BatchSummary> {
        let path_buf = path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || read_directory(&path_buf))
            .await
            .map_err(|e| IngestError::Internal(format!("Directory read task failed: {}", e)))??;
        info!(path = %path.display(), files = files.len(), "Loaded directory");
        self.process_with_cancel(files, cancel).await
    }

    /// Process a batch to completion
    pub async fn process(&self, files: Vec<BatchFile>) -> Result<BatchSummary> {
        self.process_with_cancel(files, CancellationToken::new()).await
    }

    /// Process a batch; items not yet dequeued when `cancel` fires are
    /// reported as cancelled
    pub async fn process_with_cancel(&self, files: Vec<BatchFile>, cancel: CancellationToken) -> Result<BatchSummary> {
        let started = Instant::now();
        let batch_id = Uuid::new_v4();
        let total = files.len();

        info!(batch_id = %batch_id, files = total, "Batch ingestion started");

        // Phase 1: hash + timestamp
        let prepared = prepare_files(files).await?;

        // Phase 2: partition
        let hashes: Vec<String> = prepared
            .iter()
            .filter(|file| file.timestamp.is_ok())
            .map(|file| file.content_hash.clone())
            .collect();
        let existing = self.repository.find_many_by_hash(&hashes).await?;
        let mut index = DeduplicationIndex::new(existing);

        let mut reports: Vec<Option<ItemReport>> = Vec::with_capacity(total);
        let mut pending: Vec<(usize, String, String)> = Vec::new();
        let mut items: Vec<WorkItem> = Vec::new();

        for (position, file) in prepared.into_iter().enumerate() {
            let settled = match file.timestamp {
                Err(e) => {
                    debug!(file = %file.name, error = %e, "Rejected filename");
                    Some(ItemOutcome::Rejected { reason: e.to_string() })
                }
                Ok(timestamp) => match index.admit(&file.content_hash) {
                    Admission::Skip(reason) => {
                        debug!(file = %file.name, reason = reason.as_str(), "Skipping screenshot");
                        Some(ItemOutcome::Skipped { reason })
                    }
                    Admission::Process { existing } => {
                        pending.push((position, file.name.clone(), file.content_hash.clone()));
                        items.push(WorkItem {
                            file_name: file.name.clone(),
                            bytes: Arc::clone(&file.bytes),
                            content_hash: file.content_hash.clone(),
                            timestamp,
                            existing,
                        });
                        None
                    }
                },
            };

            reports.push(settled.map(|outcome| ItemReport {
                file_name: file.name,
                content_hash: Some(file.content_hash),
                outcome,
            }));
        }

        self.emit(IngestEvent::BatchStarted {
            batch_id,
            total,
            to_process: items.len(),
            timestamp: Utc::now(),
        });
        info!(
            batch_id = %batch_id,
            total,
            to_process = items.len(),
            settled = total - items.len(),
            "Batch partitioned"
        );

        let completed = Arc::new(AtomicUsize::new(0));
        for report in reports.iter().flatten() {
            emit_item(self.events.as_ref(), batch_id, report, &completed, total);
        }

        // Phase 3: extraction
        let mut executor = AdaptiveConcurrencyExecutor::new(self.executor_config.clone());
        if let Some(bus) = &self.events {
            executor = executor.with_event_bus(bus.clone(), batch_id);
        }

        let processor = Arc::clone(&self.processor);
        let events = self.events.clone();
        let progress = Arc::clone(&completed);
        let run = executor
            .run(
                items,
                move |_, item: WorkItem| {
                    let processor = Arc::clone(&processor);
                    let events = events.clone();
                    let progress = Arc::clone(&progress);
                    async move {
                        let outcome = processor.process(&item).await?;
                        let report = ItemReport {
                            file_name: item.file_name,
                            content_hash: Some(item.content_hash),
                            outcome,
                        };
                        emit_item(events.as_ref(), batch_id, &report, &progress, total);
                        Ok::<_, ProcessError>(report)
                    }
                },
                cancel,
            )
            .await;

        // Phase 4: aggregate
        for ((position, file_name, hash), result) in pending.into_iter().zip(run.results) {
            let report = match result {
                TaskOutcome::Completed(report) => report,
                TaskOutcome::Failed { message, .. } => {
                    warn!(file = %file_name, error = %message, "Screenshot failed");
                    let report = ItemReport {
                        file_name,
                        content_hash: Some(hash),
                        outcome: ItemOutcome::Failed { error: message },
                    };
                    emit_item(self.events.as_ref(), batch_id, &report, &completed, total);
                    report
                }
                TaskOutcome::Cancelled => ItemReport {
                    file_name,
                    content_hash: Some(hash),
                    outcome: ItemOutcome::Cancelled,
                },
            };
            reports[position] = Some(report);
        }

        let mut summary = BatchSummary::new(batch_id);
        for report in reports.into_iter().flatten() {
            summary.record(report);
        }
        summary.final_concurrency = run.stats.final_concurrency;
        summary.duration_ms = started.elapsed().as_millis() as u64;

        self.emit(IngestEvent::BatchCompleted {
            batch_id,
            processed: summary.processed,
            updated: summary.updated,
            skipped: summary.skipped,
            rejected: summary.rejected,
            errored: summary.errored,
            duration_ms: summary.duration_ms,
            timestamp: Utc::now(),
        });

        info!(
            batch_id = %batch_id,
            total = summary.total,
            processed = summary.processed,
            updated = summary.updated,
            skipped = summary.skipped,
            rejected = summary.rejected,
            errored = summary.errored,
            duration_ms = summary.duration_ms,
            "Batch ingestion complete"
        );

        Ok(summary)
    }

    fn emit(&self, event: IngestEvent) {
        if let Some(bus) = &self.events {
            bus.emit_lossy(event);
        }
    }
}

fn emit_item(bus: Option<&EventBus>, batch_id: Uuid, report: &ItemReport, completed: &AtomicUsize, total: usize) {
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(bus) = bus {
        bus.emit_lossy(IngestEvent::ItemCompleted {
            batch_id,
            file_name: report.file_name.clone(),
            outcome: report.outcome.label().to_string(),
            completed: done,
            total,
            timestamp: Utc::now(),
        });
    }
}

/// Hash and timestamp every file in parallel, preserving order
async fn prepare_files(files: Vec<BatchFile>) -> Result<Vec<PreparedFile>> {
    tokio::task::spawn_blocking(move || {
        files
            .into_par_iter()
            .map(|file| {
                let content_hash = content_hash(&file.bytes);
                let timestamp = extract_timestamp(&file.name);
                PreparedFile {
                    name: file.name,
                    bytes: Arc::from(file.bytes),
                    content_hash,
                    timestamp,
                }
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| IngestError::Internal(format!("File preparation task failed: {}", e)))
}

/// Read every file entry of a ZIP container
fn read_zip(path: &Path) -> Result<Vec<BatchFile>> {
    let archive_error = |detail: String| IngestError::Archive {
        path: path.to_path_buf(),
        detail,
    };

    let file = std::fs::File::open(path).map_err(|e| archive_error(e.to_string()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| archive_error(e.to_string()))?;

    let mut files = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| archive_error(e.to_string()))?;
        let name = entry.name().to_string();
        if entry.is_dir() || name.starts_with(MACOS_METADATA_PREFIX) {
            continue;
        }

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| archive_error(format!("{}: {}", name, e)))?;
        files.push(BatchFile::new(name, bytes));
    }

    Ok(files)
}

/// Read every regular file below a directory, sorted by name
fn read_directory(path: &Path) -> Result<Vec<BatchFile>> {
    let directory_error = |detail: String| IngestError::Directory {
        path: path.to_path_buf(),
        detail,
    };

    if !path.is_dir() {
        return Err(directory_error("not a directory".to_string()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|e| directory_error(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let bytes = std::fs::read(entry.path()).map_err(|e| directory_error(format!("{}: {}", entry.path().display(), e)))?;
        let name = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .to_string();
        files.push(BatchFile::new(name, bytes));
    }

    Ok(files)
}
