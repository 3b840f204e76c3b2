//! Persistence boundary for screenshot records

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{RecordUpdate, ScreenshotRecord};

/// Persistence errors
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Write contention that outlived the retry window
    #[error("Database locked: {0}")]
    Locked(String),

    #[error("Record not found: {0}")]
    NotFound(Uuid),

    /// Stored row could not be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl PersistenceError {
    /// Whether the error is transient SQLite lock contention
    pub fn is_lock(&self) -> bool {
        match self {
            Self::Locked(_) => true,
            Self::Database(e) => e.to_string().contains("database is locked"),
            _ => false,
        }
    }
}

/// Record store keyed by content hash
///
/// Implementations must tolerate concurrent `save` calls for the same hash:
/// the last writer wins and the stored identity (`id`) is kept.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<ScreenshotRecord>, PersistenceError>;

    /// Batch lookup; hashes without a record are absent from the map
    async fn find_many_by_hash(
        &self,
        content_hashes: &[String],
    ) -> Result<HashMap<String, ScreenshotRecord>, PersistenceError>;

    /// Insert, or overwrite the record with the same content hash
    ///
    /// Returns the id of the stored record.
    async fn save(&self, record: &ScreenshotRecord) -> Result<Uuid, PersistenceError>;

    /// Apply a re-analysis patch to an existing record
    async fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<ScreenshotRecord, PersistenceError>;
}
