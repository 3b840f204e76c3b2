//! Ingest services
//!
//! - **time_authority** - filename → local reading time
//! - **dedup_index** - content-hash identity and per-batch skip decisions
//! - **adaptive_executor** - throttle-aware concurrent task runner

pub mod adaptive_executor;
pub mod dedup_index;
pub mod time_authority;

pub use adaptive_executor::{
    is_rate_limit_error, AdaptiveConcurrencyExecutor, ConcurrencyChange, ExecutorConfig, ExecutorRun,
    ExecutorStats, TaskOutcome, MIN_CONCURRENCY,
};
pub use dedup_index::{content_hash, Admission, DedupDecision, DeduplicationIndex};
pub use time_authority::{extract_timestamp, is_valid_filename, TimeError};
