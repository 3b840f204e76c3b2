//! Database access for bms-ingest
//!
//! SQLite in WAL mode with a busy timeout, so concurrent executor workers
//! can upsert records while readers keep going.

pub mod records;
pub mod repository;

pub use records::SqliteRecordRepository;
pub use repository::{PersistenceError, RecordRepository};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite busy timeout
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection pool
///
/// Creates the file and parent directory if missing, then the tables.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool, PersistenceError> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PersistenceError::Database(sqlx::Error::Io(e)))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    if newly_created {
        tracing::info!(path = %db_path.display(), "Initialized new database");
    } else {
        tracing::info!(path = %db_path.display(), "Opened existing database");
    }

    records::init_records_table(&pool).await?;

    Ok(pool)
}

/// In-memory pool for tests and dry runs
///
/// A single connection, since every `:memory:` connection is its own database.
pub async fn init_memory_pool() -> Result<SqlitePool, PersistenceError> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    records::init_records_table(&pool).await?;

    Ok(pool)
}
