//! Data models for bms-ingest

pub mod batch_summary;
pub mod record;

pub use batch_summary::{BatchSummary, ItemOutcome, ItemReport, SkipReason};
pub use record::{ExtractedFields, RecordField, RecordUpdate, ScreenshotRecord, VerificationState};
