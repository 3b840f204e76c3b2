//! In-memory record repository

use async_trait::async_trait;
use bms_ingest::db::{PersistenceError, RecordRepository};
use bms_ingest::models::{RecordUpdate, ScreenshotRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Records keyed by content hash
#[derive(Default)]
pub struct InMemoryRepository {
    records: Mutex<HashMap<String, ScreenshotRecord>>,
    /// Remaining writes that fail with a lock error
    locked_writes: AtomicUsize,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with stored records
    pub fn with_records(records: impl IntoIterator<Item = ScreenshotRecord>) -> Self {
        let repository = Self::new();
        {
            let mut map = repository.records.lock().unwrap();
            for record in records {
                map.insert(record.content_hash.clone(), record);
            }
        }
        repository
    }

    /// Make the next `count` writes fail as if the database were locked
    pub fn fail_writes(&self, count: usize) {
        self.locked_writes.store(count, Ordering::SeqCst);
    }

    pub fn get(&self, content_hash: &str) -> Option<ScreenshotRecord> {
        self.records.lock().unwrap().get(content_hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn take_lock_failure(&self) -> Result<(), PersistenceError> {
        let remaining = self.locked_writes.load(Ordering::SeqCst);
        if remaining > 0 {
            self.locked_writes.store(remaining - 1, Ordering::SeqCst);
            return Err(PersistenceError::Locked("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordRepository for InMemoryRepository {
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<ScreenshotRecord>, PersistenceError> {
        Ok(self.get(content_hash))
    }

    async fn find_many_by_hash(
        &self,
        content_hashes: &[String],
    ) -> Result<HashMap<String, ScreenshotRecord>, PersistenceError> {
        let records = self.records.lock().unwrap();
        Ok(content_hashes
            .iter()
            .filter_map(|hash| records.get(hash).map(|r| (hash.clone(), r.clone())))
            .collect())
    }

    async fn save(&self, record: &ScreenshotRecord) -> Result<Uuid, PersistenceError> {
        self.take_lock_failure()?;
        let mut records = self.records.lock().unwrap();
        let stored = records
            .entry(record.content_hash.clone())
            .and_modify(|existing| {
                let first = existing.clone();
                *existing = record.clone();
                existing.id = first.id;
                existing.file_name = first.file_name;
                existing.timestamp_from_filename = first.timestamp_from_filename;
                existing.created_at = first.created_at;
                existing.analysis_count = first.analysis_count.max(record.analysis_count);
                if existing.weather.is_none() {
                    existing.weather = first.weather;
                }
            })
            .or_insert_with(|| record.clone());
        Ok(stored.id)
    }

    async fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<ScreenshotRecord, PersistenceError> {
        self.take_lock_failure()?;
        let mut records = self.records.lock().unwrap();
        let record = records
            .values_mut()
            .find(|r| r.id == id)
            .ok_or(PersistenceError::NotFound(id))?;
        record.apply_update(update);
        Ok(record.clone())
    }
}
