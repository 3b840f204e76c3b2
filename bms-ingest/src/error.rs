//! Error types for bms-ingest
//!
//! Per-item problems (bad filename, oracle failure, persistence failure) are
//! recorded in the batch summary and never surface here. [`IngestError`] is
//! reserved for failures that prevent a batch from starting: an unreadable
//! container, an unreadable directory, or a failed prefetch query.

use std::path::PathBuf;
use thiserror::Error;

use crate::db::PersistenceError;
use crate::extractors::{VisionError, WeatherError};

/// Batch setup errors
#[derive(Debug, Error)]
pub enum IngestError {
    /// ZIP container could not be opened or read
    #[error("Failed to read archive {path}: {detail}")]
    Archive { path: PathBuf, detail: String },

    /// Input directory could not be read
    #[error("Failed to read directory {path}: {detail}")]
    Directory { path: PathBuf, detail: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Vision client error: {0}")]
    Vision(#[from] VisionError),

    #[error("Weather client error: {0}")]
    Weather(#[from] WeatherError),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Background task failed to complete
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Common(#[from] bms_common::Error),
}

/// Result alias for batch-level operations
pub type Result<T> = std::result::Result<T, IngestError>;
