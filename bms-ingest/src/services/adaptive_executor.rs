//! Adaptive Concurrency Executor
//!
//! Runs one async task per item with a worker pool that grows and shrinks in
//! response to what the upstream oracle tells it: latency and error signals.
//!
//! # Model
//! - `target` logical workers pull item indices from a shared cursor. Worker
//!   `k` only dequeues while `k < current_concurrency`; otherwise it idles.
//! - All throttle decisions are made while holding the single pool-state lock.
//! - Results are written by absolute index: `results[i]` belongs to `items[i]`.
//!
//! # Throttling
//! - **Rate limit** (429, quota, overloaded, ...): concurrency ×0.5, global
//!   backoff window, item re-queued. An item that keeps getting throttled
//!   fails after `max_rate_limit_retries`.
//! - **Error streak**: 3 consecutive other errors: concurrency ×0.7.
//! - **Slow streak**: 3 consecutive slow successes: concurrency ×0.7. A fast
//!   success decays the streak by one.
//! - **Recovery**: +1 when below target, enough samples, low average latency
//!   and no error streak.
//!
//! Concurrency never drops below [`MIN_CONCURRENCY`] (or the target, if the
//! target is smaller).

use bms_common::events::{EventBus, IngestEvent};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lowest concurrency the executor throttles down to
pub const MIN_CONCURRENCY: usize = 2;

/// Size of the response-time ring buffer
pub const RESPONSE_WINDOW: usize = 10;

/// Error message fragments that identify upstream throttling
const RATE_LIMIT_PATTERNS: [&str; 7] = [
    "rate limit",
    "too many requests",
    "429",
    "quota",
    "resource exhausted",
    "503",
    "overloaded",
];

/// Whether an error message describes upstream throttling
pub fn is_rate_limit_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_PATTERNS.iter().any(|pattern| lower.contains(pattern))
}

/// Executor tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Workers spawned, and the ceiling recovery climbs back to
    pub target_concurrency: usize,
    /// Sleep of an inactive worker between dequeue attempts
    pub idle_poll_ms: u64,
    /// Backoff unit after a rate limit, multiplied by the error streak + 1
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// A success slower than this counts toward the slow streak
    pub slow_response_ms: u64,
    /// Average latency must be under this to scale up
    pub fast_response_ms: u64,
    pub error_streak_threshold: u32,
    pub slow_streak_threshold: u32,
    /// Samples required before scaling up
    pub min_samples_for_increase: usize,
    /// Re-queues allowed per item before a rate limit becomes a failure
    pub max_rate_limit_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            target_concurrency: 8,
            idle_poll_ms: 100,
            base_backoff_ms: 2000,
            max_backoff_ms: 60_000,
            slow_response_ms: 8000,
            fast_response_ms: 3000,
            error_streak_threshold: 3,
            slow_streak_threshold: 3,
            min_samples_for_increase: 5,
            max_rate_limit_retries: 5,
        }
    }
}

/// Outcome of one item
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<R> {
    Completed(R),
    Failed { message: String, rate_limited: bool },
    /// Never dequeued because the run was cancelled
    Cancelled,
}

impl<R> TaskOutcome<R> {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// One concurrency adjustment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConcurrencyChange {
    pub from: usize,
    pub to: usize,
    pub reason: String,
}

/// Counters for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorStats {
    pub target_concurrency: usize,
    pub final_concurrency: usize,
    /// Every adjustment in the order it was made
    pub history: Vec<ConcurrencyChange>,
    pub rate_limit_hits: usize,
    pub requeued: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
}

impl ExecutorStats {
    /// Lowest concurrency reached during the run
    pub fn min_concurrency(&self) -> usize {
        self.history
            .iter()
            .map(|change| change.to)
            .min()
            .unwrap_or(self.target_concurrency)
            .min(self.final_concurrency)
    }
}

/// Result of [`AdaptiveConcurrencyExecutor::run`]
#[derive(Debug)]
pub struct ExecutorRun<R> {
    /// `results[i]` is the outcome of `items[i]`
    pub results: Vec<TaskOutcome<R>>,
    pub stats: ExecutorStats,
}

/// Shared, lock-guarded pool state
struct WorkerPoolState {
    current_concurrency: usize,
    consecutive_errors: u32,
    consecutive_slow_responses: u32,
    recent_response_times: VecDeque<Duration>,
    backoff_until: Option<Instant>,
    cursor: usize,
    requeue: VecDeque<usize>,
    in_flight: usize,
    rate_limit_attempts: Vec<u32>,
    history: Vec<ConcurrencyChange>,
    rate_limit_hits: usize,
    requeued: usize,
}

impl WorkerPoolState {
    fn new(item_count: usize, target: usize) -> Self {
        Self {
            current_concurrency: target,
            consecutive_errors: 0,
            consecutive_slow_responses: 0,
            recent_response_times: VecDeque::with_capacity(RESPONSE_WINDOW),
            backoff_until: None,
            cursor: 0,
            requeue: VecDeque::new(),
            in_flight: 0,
            rate_limit_attempts: vec![0; item_count],
            history: Vec::new(),
            rate_limit_hits: 0,
            requeued: 0,
        }
    }

    fn record_response_time(&mut self, elapsed: Duration) {
        if self.recent_response_times.len() == RESPONSE_WINDOW {
            self.recent_response_times.pop_front();
        }
        self.recent_response_times.push_back(elapsed);
    }

    fn average_response_time(&self) -> Option<Duration> {
        if self.recent_response_times.is_empty() {
            return None;
        }
        let total: Duration = self.recent_response_times.iter().sum();
        Some(total / self.recent_response_times.len() as u32)
    }

    fn scale(&mut self, to: usize, reason: String) -> Option<ConcurrencyChange> {
        if to == self.current_concurrency {
            return None;
        }
        let change = ConcurrencyChange {
            from: self.current_concurrency,
            to,
            reason,
        };
        self.current_concurrency = to;
        self.history.push(change.clone());
        Some(change)
    }

    fn scale_down(&mut self, factor: f64, floor: usize, reason: &str) -> Option<ConcurrencyChange> {
        let to = ((self.current_concurrency as f64 * factor).floor() as usize).max(floor);
        self.scale(to, reason.to_string())
    }
}

enum Step {
    Run(usize),
    Wait(Duration),
    Stop,
}

enum Attempt<R> {
    Success(R),
    Error(String),
    Panicked(String),
}

struct Shared<T, F> {
    items: Vec<T>,
    task_fn: F,
    state: Mutex<WorkerPoolState>,
    config: ExecutorConfig,
    target: usize,
    floor: usize,
    cancel: CancellationToken,
    events: Option<(EventBus, Uuid)>,
}

impl<T, F> Shared<T, F> {
    async fn next_step(&self, worker: usize) -> Step {
        let idle = Duration::from_millis(self.config.idle_poll_ms);
        let mut state = self.state.lock().await;

        if self.cancel.is_cancelled() {
            return Step::Stop;
        }
        if state.cursor >= self.items.len() && state.requeue.is_empty() && state.in_flight == 0 {
            return Step::Stop;
        }
        if worker >= state.current_concurrency {
            return Step::Wait(idle);
        }
        if let Some(until) = state.backoff_until {
            let now = Instant::now();
            if now < until {
                return Step::Wait((until - now).min(idle));
            }
            state.backoff_until = None;
        }

        let next = if let Some(index) = state.requeue.pop_front() {
            Some(index)
        } else if state.cursor < self.items.len() {
            let index = state.cursor;
            state.cursor += 1;
            Some(index)
        } else {
            None
        };

        match next {
            Some(index) => {
                state.in_flight += 1;
                Step::Run(index)
            }
            // Nothing queued, but an in-flight item may still be re-queued
            None => Step::Wait(idle),
        }
    }

    /// Apply throttle rules for a finished attempt
    ///
    /// Returns `None` when the item was re-queued.
    async fn settle<R>(&self, index: usize, elapsed: Duration, attempt: Attempt<R>) -> Option<TaskOutcome<R>> {
        let config = &self.config;
        let mut state = self.state.lock().await;
        state.in_flight = state.in_flight.saturating_sub(1);

        let mut changes = Vec::new();

        let outcome = match attempt {
            Attempt::Success(value) => {
                state.record_response_time(elapsed);
                state.consecutive_errors = 0;

                if elapsed > Duration::from_millis(config.slow_response_ms) {
                    state.consecutive_slow_responses += 1;
                    if state.consecutive_slow_responses >= config.slow_streak_threshold {
                        state.consecutive_slow_responses = 0;
                        changes.extend(state.scale_down(0.7, self.floor, "slow responses"));
                    }
                } else {
                    state.consecutive_slow_responses = state.consecutive_slow_responses.saturating_sub(1);
                }

                let fast = state
                    .average_response_time()
                    .map_or(false, |avg| avg < Duration::from_millis(config.fast_response_ms));
                if state.current_concurrency < self.target
                    && state.recent_response_times.len() >= config.min_samples_for_increase
                    && fast
                    && state.consecutive_errors == 0
                {
                    let to = state.current_concurrency + 1;
                    changes.extend(state.scale(to, "fast responses".to_string()));
                }

                Some(TaskOutcome::Completed(value))
            }
            Attempt::Error(message) if is_rate_limit_error(&message) => {
                state.rate_limit_hits += 1;
                let backoff_ms = config
                    .base_backoff_ms
                    .saturating_mul(u64::from(state.consecutive_errors) + 1)
                    .min(config.max_backoff_ms);
                state.consecutive_errors += 1;
                state.backoff_until = Some(Instant::now() + Duration::from_millis(backoff_ms));
                changes.extend(state.scale_down(0.5, self.floor, "rate limited"));

                state.rate_limit_attempts[index] += 1;
                if state.rate_limit_attempts[index] > config.max_rate_limit_retries {
                    warn!(index, attempts = state.rate_limit_attempts[index], error = %message, "Rate limit retries exhausted");
                    Some(TaskOutcome::Failed {
                        message,
                        rate_limited: true,
                    })
                } else {
                    debug!(index, backoff_ms, "Rate limited, re-queueing item");
                    state.requeue.push_back(index);
                    state.requeued += 1;
                    None
                }
            }
            Attempt::Error(message) | Attempt::Panicked(message) => {
                state.consecutive_errors += 1;
                if state.consecutive_errors >= config.error_streak_threshold {
                    state.consecutive_errors = 0;
                    changes.extend(state.scale_down(0.7, self.floor, "consecutive errors"));
                }
                Some(TaskOutcome::Failed {
                    message,
                    rate_limited: false,
                })
            }
        };

        for change in changes {
            if change.to < change.from {
                warn!(from = change.from, to = change.to, reason = %change.reason, "Reducing concurrency");
            } else {
                info!(from = change.from, to = change.to, reason = %change.reason, "Increasing concurrency");
            }
            if let Some((bus, batch_id)) = &self.events {
                bus.emit_lossy(IngestEvent::ConcurrencyChanged {
                    batch_id: *batch_id,
                    from: change.from,
                    to: change.to,
                    reason: change.reason,
                    timestamp: chrono::Utc::now(),
                });
            }
        }

        outcome
    }
}

/// Adaptive Concurrency Executor
pub struct AdaptiveConcurrencyExecutor {
    config: ExecutorConfig,
    events: Option<(EventBus, Uuid)>,
}

impl AdaptiveConcurrencyExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config, events: None }
    }

    /// Broadcast concurrency changes as [`IngestEvent::ConcurrencyChanged`]
    pub fn with_event_bus(mut self, bus: EventBus, batch_id: Uuid) -> Self {
        self.events = Some((bus, batch_id));
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Run `task_fn(index, item)` for every item
    ///
    /// Never fails: every item ends as completed, failed or cancelled. The
    /// cancellation token is checked once per dequeue; in-flight calls are
    /// never interrupted.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, task_fn: F, cancel: CancellationToken) -> ExecutorRun<R>
    where
        T: Clone + Send + Sync + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
        F: Fn(usize, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        let started = Instant::now();
        let target = self.config.target_concurrency.max(1);
        let floor = MIN_CONCURRENCY.min(target);
        let item_count = items.len();

        let mut stats = ExecutorStats {
            target_concurrency: target,
            final_concurrency: target,
            ..Default::default()
        };

        if item_count == 0 {
            return ExecutorRun {
                results: Vec::new(),
                stats,
            };
        }

        info!(items = item_count, target, "Starting adaptive executor");

        let shared = Arc::new(Shared {
            items,
            task_fn,
            state: Mutex::new(WorkerPoolState::new(item_count, target)),
            config: self.config.clone(),
            target,
            floor,
            cancel,
            events: self.events.clone(),
        });

        let workers: Vec<_> = (0..target)
            .map(|worker| tokio::spawn(worker_loop(worker, Arc::clone(&shared))))
            .collect();

        let mut results: Vec<TaskOutcome<R>> = (0..item_count).map(|_| TaskOutcome::Cancelled).collect();
        for joined in futures::future::join_all(workers).await {
            match joined {
                Ok(finished) => {
                    for (index, outcome) in finished {
                        results[index] = outcome;
                    }
                }
                Err(e) => error!(error = %e, "Executor worker terminated abnormally"),
            }
        }

        let state = shared.state.lock().await;
        stats.final_concurrency = state.current_concurrency;
        stats.history = state.history.clone();
        stats.rate_limit_hits = state.rate_limit_hits;
        stats.requeued = state.requeued;
        for outcome in &results {
            match outcome {
                TaskOutcome::Completed(_) => stats.completed += 1,
                TaskOutcome::Failed { .. } => stats.failed += 1,
                TaskOutcome::Cancelled => stats.cancelled += 1,
            }
        }
        stats.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            completed = stats.completed,
            failed = stats.failed,
            cancelled = stats.cancelled,
            final_concurrency = stats.final_concurrency,
            "Adaptive executor finished"
        );

        ExecutorRun { results, stats }
    }
}

async fn worker_loop<T, R, E, F, Fut>(worker: usize, shared: Arc<Shared<T, F>>) -> Vec<(usize, TaskOutcome<R>)>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
    F: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
{
    let mut finished = Vec::new();

    loop {
        let index = match shared.next_step(worker).await {
            Step::Stop => break,
            Step::Wait(duration) => {
                sleep(duration).await;
                continue;
            }
            Step::Run(index) => index,
        };

        let item = shared.items[index].clone();
        let started = Instant::now();
        // Own task so a panic is reported as a JoinError instead of killing the worker
        let attempt = match tokio::spawn((shared.task_fn)(index, item)).await {
            Ok(Ok(value)) => Attempt::Success(value),
            Ok(Err(e)) => Attempt::Error(e.to_string()),
            Err(e) => Attempt::Panicked(format!("Task panicked: {}", e)),
        };
        let elapsed = started.elapsed();

        if let Some(outcome) = shared.settle(index, elapsed, attempt).await {
            finished.push((index, outcome));
        }
    }

    debug!(worker, items = finished.len(), "Worker finished");
    finished
}
