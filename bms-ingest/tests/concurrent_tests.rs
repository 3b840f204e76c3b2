//! Throttling and concurrency behavior through the full pipeline

mod helpers;

use bms_common::events::{EventBus, IngestEvent};
use bms_ingest::db::RecordRepository;
use bms_ingest::models::ItemOutcome;
use bms_ingest::services::{ExecutorConfig, MIN_CONCURRENCY};
use bms_ingest::validators::PhysicsPolicy;
use bms_ingest::workflow::{BatchFile, BatchIngestionPipeline, ScreenshotProcessor};
use helpers::{complete_fields, create_test_db, screenshot_name, InMemoryRepository, ScriptedVision};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn throttle_config(target: usize) -> ExecutorConfig {
    ExecutorConfig {
        target_concurrency: target,
        idle_poll_ms: 1,
        base_backoff_ms: 1,
        max_backoff_ms: 10,
        ..Default::default()
    }
}

fn files(count: u32) -> Vec<BatchFile> {
    (0..count)
        .map(|i| BatchFile::new(screenshot_name(i), format!("screen-{}", i).into_bytes()))
        .collect()
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<IngestEvent>) -> Vec<IngestEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transient_throttling_loses_no_items() {
    let repository: Arc<dyn RecordRepository> = Arc::new(InMemoryRepository::new());
    let vision = Arc::new(ScriptedVision::new(complete_fields()).rate_limit_first(6));
    let processor = ScreenshotProcessor::new(vision.clone(), Arc::clone(&repository), PhysicsPolicy::default());

    let bus = EventBus::new(512);
    let mut rx = bus.subscribe();
    let pipeline = BatchIngestionPipeline::new(processor, repository, throttle_config(4)).with_events(bus);

    let summary = pipeline.process(files(20)).await.unwrap();

    assert_eq!(summary.processed, 20);
    assert_eq!(summary.errored, 0);
    assert_eq!(vision.calls(), 26);
    assert!(summary.final_concurrency >= MIN_CONCURRENCY);
    assert!(summary.final_concurrency <= 4);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        IngestEvent::ConcurrencyChanged { from: 4, to: 2, .. }
    )));
    let completed = events
        .iter()
        .filter(|e| matches!(e, IngestEvent::ItemCompleted { .. }))
        .count();
    assert_eq!(completed, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_persistent_throttling_fails_items_after_retry_cap() {
    let repository = Arc::new(InMemoryRepository::new());
    let vision = Arc::new(ScriptedVision::new(complete_fields()).rate_limit_first(usize::MAX));
    let processor = ScreenshotProcessor::new(vision.clone(), repository.clone(), PhysicsPolicy::default());
    let config = ExecutorConfig {
        max_rate_limit_retries: 2,
        ..throttle_config(4)
    };
    let pipeline = BatchIngestionPipeline::new(processor, repository.clone(), config);

    let summary = pipeline.process(files(3)).await.unwrap();

    assert_eq!(summary.errored, 3);
    assert_eq!(summary.final_concurrency, MIN_CONCURRENCY);
    assert_eq!(vision.calls(), 9);
    for item in &summary.items {
        match &item.outcome {
            ItemOutcome::Failed { error } => assert!(error.contains("429"), "{}", error),
            other => panic!("Expected failure, got {:?}", other),
        }
    }
    assert_eq!(repository.len(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_to_file_database() {
    let (_dir, repository) = create_test_db().await;
    let repository: Arc<dyn RecordRepository> = Arc::new(repository);
    let vision = Arc::new(ScriptedVision::new(complete_fields()).with_delay(Duration::from_millis(5)));
    let processor = ScreenshotProcessor::new(vision, Arc::clone(&repository), PhysicsPolicy::default());
    let pipeline = BatchIngestionPipeline::new(processor, Arc::clone(&repository), throttle_config(8));

    let summary = pipeline.process(files(40)).await.unwrap();
    assert_eq!(summary.processed, 40);

    let hashes: Vec<String> = summary
        .items
        .iter()
        .filter_map(|i| i.content_hash.clone())
        .collect();
    let stored = repository.find_many_by_hash(&hashes).await.unwrap();
    assert_eq!(stored.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_mid_batch() {
    let repository = Arc::new(InMemoryRepository::new());
    let vision = Arc::new(ScriptedVision::new(complete_fields()).with_delay(Duration::from_millis(20)));
    let processor = ScreenshotProcessor::new(vision, repository.clone(), PhysicsPolicy::default());
    let pipeline = BatchIngestionPipeline::new(processor, repository.clone(), throttle_config(2));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = pipeline.process_with_cancel(files(40), cancel).await.unwrap();

    let cancelled = summary
        .items_where(|o| matches!(o, ItemOutcome::Cancelled))
        .count();
    assert_eq!(summary.total, 40);
    assert!(cancelled > 0);
    assert_eq!(summary.processed + cancelled, 40);
    assert_eq!(repository.len(), summary.processed);
}
