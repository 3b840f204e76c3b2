//! SQLite record store
//!
//! One row per content hash. Structured parts of a record (fields, physics
//! report, missing fields, fixes, weather) are stored as JSON text columns.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use uuid::Uuid;

use super::repository::{PersistenceError, RecordRepository};
use crate::models::{RecordUpdate, ScreenshotRecord, VerificationState};
use crate::utils::retry_on_lock;

/// Storage format of `timestamp_from_filename` (no offset: local wall-clock)
const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Bound parameters per `IN (...)` query, below SQLite's variable limit
const HASH_CHUNK_SIZE: usize = 500;

const SELECT_COLUMNS: &str = "id, content_hash, file_name, timestamp_from_filename, fields, \
     verification_state, analysis_count, needs_reanalysis, missing_fields, validation, \
     fixes_applied, weather, created_at, updated_at";

/// Create the records table
pub async fn init_records_table(pool: &SqlitePool) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS screenshot_records (
            id TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL UNIQUE,
            file_name TEXT NOT NULL,
            timestamp_from_filename TEXT NOT NULL,
            fields TEXT NOT NULL DEFAULT '{}',
            verification_state TEXT CHECK (verification_state IN ('A', 'B', 'C', 'D')),
            analysis_count INTEGER NOT NULL DEFAULT 1,
            needs_reanalysis INTEGER NOT NULL DEFAULT 0,
            missing_fields TEXT NOT NULL DEFAULT '[]',
            validation TEXT NOT NULL,
            fixes_applied TEXT NOT NULL DEFAULT '[]',
            weather TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_screenshot_records_timestamp ON screenshot_records(timestamp_from_filename)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// [`RecordRepository`] backed by SQLite
#[derive(Clone)]
pub struct SqliteRecordRepository {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl SqliteRecordRepository {
    pub fn new(pool: SqlitePool, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            max_lock_wait_ms,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn find_by_id(&self, id: Uuid) -> Result<ScreenshotRecord, PersistenceError> {
        let sql = format!("SELECT {} FROM screenshot_records WHERE id = ?", SELECT_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PersistenceError::NotFound(id))?;
        record_from_row(&row)
    }
}

#[async_trait]
impl RecordRepository for SqliteRecordRepository {
    async fn find_by_hash(&self, content_hash: &str) -> Result<Option<ScreenshotRecord>, PersistenceError> {
        let sql = format!(
            "SELECT {} FROM screenshot_records WHERE content_hash = ?",
            SELECT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn find_many_by_hash(
        &self,
        content_hashes: &[String],
    ) -> Result<HashMap<String, ScreenshotRecord>, PersistenceError> {
        let mut found = HashMap::new();

        for chunk in content_hashes.chunks(HASH_CHUNK_SIZE) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM screenshot_records WHERE content_hash IN ({})",
                SELECT_COLUMNS, placeholders
            );
            let mut query = sqlx::query(&sql);
            for hash in chunk {
                query = query.bind(hash);
            }
            for row in query.fetch_all(&self.pool).await? {
                let record = record_from_row(&row)?;
                found.insert(record.content_hash.clone(), record);
            }
        }

        tracing::debug!(
            requested = content_hashes.len(),
            found = found.len(),
            "Prefetched records by hash"
        );
        Ok(found)
    }

    async fn save(&self, record: &ScreenshotRecord) -> Result<Uuid, PersistenceError> {
        let fields = serde_json::to_string(&record.fields)?;
        let missing = serde_json::to_string(&record.missing_fields)?;
        let validation = serde_json::to_string(&record.validation)?;
        let fixes = serde_json::to_string(&record.fixes_applied)?;
        let weather = record.weather.as_ref().map(serde_json::to_string).transpose()?;
        let state = record.verification_state.map(|s| s.code());
        let timestamp = record.timestamp_from_filename.format(LOCAL_TIMESTAMP_FORMAT).to_string();
        let created_at = record.created_at.to_rfc3339();
        let updated_at = record.updated_at.to_rfc3339();

        retry_on_lock("record save", self.max_lock_wait_ms, || async {
            sqlx::query(
                r#"
                INSERT INTO screenshot_records (
                    id, content_hash, file_name, timestamp_from_filename, fields,
                    verification_state, analysis_count, needs_reanalysis, missing_fields,
                    validation, fixes_applied, weather, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(content_hash) DO UPDATE SET
                    fields = excluded.fields,
                    verification_state = excluded.verification_state,
                    analysis_count = MAX(screenshot_records.analysis_count, excluded.analysis_count),
                    needs_reanalysis = excluded.needs_reanalysis,
                    missing_fields = excluded.missing_fields,
                    validation = excluded.validation,
                    fixes_applied = excluded.fixes_applied,
                    weather = COALESCE(excluded.weather, screenshot_records.weather),
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(record.id.to_string())
            .bind(&record.content_hash)
            .bind(&record.file_name)
            .bind(&timestamp)
            .bind(&fields)
            .bind(state)
            .bind(i64::from(record.analysis_count))
            .bind(record.needs_reanalysis)
            .bind(&missing)
            .bind(&validation)
            .bind(&fixes)
            .bind(weather.as_deref())
            .bind(&created_at)
            .bind(&updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await?;

        let (id,): (String,) = sqlx::query_as("SELECT id FROM screenshot_records WHERE content_hash = ?")
            .bind(&record.content_hash)
            .fetch_one(&self.pool)
            .await?;

        Uuid::parse_str(&id).map_err(|e| PersistenceError::Corrupt(format!("Invalid UUID '{}': {}", id, e)))
    }

    async fn update(&self, id: Uuid, update: &RecordUpdate) -> Result<ScreenshotRecord, PersistenceError> {
        let fields = serde_json::to_string(&update.fields)?;
        let missing = serde_json::to_string(&update.missing_fields)?;
        let validation = serde_json::to_string(&update.validation)?;
        let fixes = serde_json::to_string(&update.fixes_applied)?;
        let weather = update.weather.as_ref().map(serde_json::to_string).transpose()?;
        let updated_at = Utc::now().to_rfc3339();

        let rows = retry_on_lock("record update", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE screenshot_records SET
                    fields = ?,
                    verification_state = ?,
                    analysis_count = MAX(analysis_count, ?),
                    needs_reanalysis = ?,
                    missing_fields = ?,
                    validation = ?,
                    fixes_applied = ?,
                    weather = COALESCE(?, weather),
                    updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&fields)
            .bind(update.verification_state.code())
            .bind(i64::from(update.analysis_count))
            .bind(update.needs_reanalysis)
            .bind(&missing)
            .bind(&validation)
            .bind(&fixes)
            .bind(weather.as_deref())
            .bind(&updated_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if rows == 0 {
            return Err(PersistenceError::NotFound(id));
        }

        self.find_by_id(id).await
    }
}

fn record_from_row(row: &SqliteRow) -> Result<ScreenshotRecord, PersistenceError> {
    let id: String = row.try_get("id")?;
    let timestamp: String = row.try_get("timestamp_from_filename")?;
    let state: Option<String> = row.try_get("verification_state")?;
    let analysis_count: i64 = row.try_get("analysis_count")?;
    let fields: String = row.try_get("fields")?;
    let missing: String = row.try_get("missing_fields")?;
    let validation: String = row.try_get("validation")?;
    let fixes: String = row.try_get("fixes_applied")?;
    let weather: Option<String> = row.try_get("weather")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    let verification_state = match state {
        Some(code) => Some(
            VerificationState::from_code(&code)
                .ok_or_else(|| PersistenceError::Corrupt(format!("Unknown verification state '{}'", code)))?,
        ),
        None => None,
    };

    Ok(ScreenshotRecord {
        id: Uuid::parse_str(&id).map_err(|e| PersistenceError::Corrupt(format!("Invalid UUID '{}': {}", id, e)))?,
        content_hash: row.try_get("content_hash")?,
        file_name: row.try_get("file_name")?,
        timestamp_from_filename: NaiveDateTime::parse_from_str(&timestamp, LOCAL_TIMESTAMP_FORMAT)
            .map_err(|e| PersistenceError::Corrupt(format!("Invalid timestamp '{}': {}", timestamp, e)))?,
        fields: serde_json::from_str(&fields)?,
        verification_state,
        analysis_count: u32::try_from(analysis_count)
            .map_err(|_| PersistenceError::Corrupt(format!("Invalid analysis count {}", analysis_count)))?,
        needs_reanalysis: row.try_get("needs_reanalysis")?,
        missing_fields: serde_json::from_str(&missing)?,
        validation: serde_json::from_str(&validation)?,
        fixes_applied: serde_json::from_str(&fixes)?,
        weather: weather.as_deref().map(serde_json::from_str).transpose()?,
        created_at: parse_utc(&created_at)?,
        updated_at: parse_utc(&updated_at)?,
    })
}

fn parse_utc(value: &str) -> Result<DateTime<Utc>, PersistenceError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PersistenceError::Corrupt(format!("Invalid UTC timestamp '{}': {}", value, e)))
}
