//! SQLite adapters: the durable dispatch job store.

pub mod connection;
pub mod job_store;
pub mod migrations;

pub use connection::{create_pool, create_test_pool, database_url, PoolConfig, PoolError};
pub use job_store::SqliteJobStore;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{QueueError, QueueResult};

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> QueueResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| QueueError::Serialization(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> QueueResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| QueueError::Serialization(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> QueueResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_datetime).transpose()
}

/// Fixed-width UTC rendering, so stored timestamps compare correctly as text.
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] PoolError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Open (creating if needed) and migrate the job database.
pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, None).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// In-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}
