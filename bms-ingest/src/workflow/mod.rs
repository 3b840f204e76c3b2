//! Screenshot ingestion workflow
//!
//! - **screenshot_processor** - oracle → fixes → validation → state → store,
//!   for one screenshot
//! - **pipeline** - batch loading, deduplication, adaptive extraction and
//!   the batch summary

pub mod pipeline;
pub mod screenshot_processor;

pub use pipeline::{BatchFile, BatchIngestionPipeline};
pub use screenshot_processor::{ProcessError, ScreenshotProcessor, WeatherEnrichment, WorkItem};
