//! Embedded schema migrations, tracked in `schema_migrations`.

use sqlx::SqlitePool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Failed to execute migration {version}: {source}")]
    ExecutionError { version: i64, #[source] source: sqlx::Error },
    #[error("Failed to get schema version: {0}")]
    VersionCheckError(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub version: i64,
    pub description: String,
    pub sql: String,
}

pub struct Migrator {
    pool: SqlitePool,
}

impl Migrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Apply every migration newer than the recorded schema version.
    /// Returns how many were applied.
    pub async fn run_embedded_migrations(&self, migrations: Vec<Migration>) -> Result<usize, MigrationError> {
        self.ensure_migrations_table().await?;
        let current_version = self.get_current_version().await?;
        let pending: Vec<_> = migrations.into_iter().filter(|m| m.version > current_version).collect();

        for migration in &pending {
            self.apply_migration(migration).await?;
            tracing::info!(version = migration.version, description = %migration.description, "Applied migration");
        }

        Ok(pending.len())
    }

    async fn ensure_migrations_table(&self) -> Result<(), MigrationError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now')),
                description TEXT
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MigrationError::ExecutionError { version: 0, source: e })?;
        Ok(())
    }

    pub async fn get_current_version(&self) -> Result<i64, MigrationError> {
        let result: Option<(i64,)> = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
            .fetch_optional(&self.pool)
            .await
            .map_err(MigrationError::VersionCheckError)?;
        Ok(result.map(|(v,)| v).unwrap_or(0))
    }

    async fn apply_migration(&self, migration: &Migration) -> Result<(), MigrationError> {
        let exec_err = |e| MigrationError::ExecutionError { version: migration.version, source: e };

        let mut tx = self.pool.begin().await.map_err(exec_err)?;
        sqlx::raw_sql(&migration.sql).execute(&mut *tx).await.map_err(exec_err)?;
        sqlx::query("INSERT INTO schema_migrations (version, description) VALUES (?, ?)")
            .bind(migration.version)
            .bind(&migration.description)
            .execute(&mut *tx)
            .await
            .map_err(exec_err)?;
        tx.commit().await.map_err(exec_err)?;
        Ok(())
    }
}

pub fn dispatch_jobs_migration() -> Migration {
    Migration {
        version: 1,
        description: "Dispatch job store".to_string(),
        sql: include_str!("../../../migrations/001_dispatch_jobs.sql").to_string(),
    }
}

pub fn all_embedded_migrations() -> Vec<Migration> {
    vec![dispatch_jobs_migration()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_test_pool;

    #[tokio::test]
    async fn test_migrations_apply_once() {
        let pool = create_test_pool().await.unwrap();
        let migrator = Migrator::new(pool.clone());

        assert_eq!(migrator.run_embedded_migrations(all_embedded_migrations()).await.unwrap(), 1);
        assert_eq!(migrator.run_embedded_migrations(all_embedded_migrations()).await.unwrap(), 0);
        assert_eq!(migrator.get_current_version().await.unwrap(), 1);

        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dispatch_jobs")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
