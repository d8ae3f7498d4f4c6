//! # Configuration Store Schema
//!
//! The configuration tables are owned by the administrative side of the
//! platform. The schema below is embedded so development databases and tests
//! can bootstrap it; every statement is idempotent.

use crate::errors::{Result, SourceplaneError};
use crate::storage::DbPool;
use sqlx::Row;
use tracing::{error, info};

/// Embedded migrations as (version, description, sql)
const MIGRATIONS: &[(i64, &str, &str)] = &[
    (
        1,
        "create_data_source_configs",
        r#"
        CREATE TABLE IF NOT EXISTS data_source_configs (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            source_type TEXT NOT NULL,
            encrypted_secret TEXT,
            custom_queries TEXT NOT NULL DEFAULT '{}',
            is_active BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_data_source_configs_workspace_active
            ON data_source_configs (workspace_id, is_active, created_at);
        "#,
    ),
    (
        2,
        "create_status_mappings",
        r#"
        CREATE TABLE IF NOT EXISTS status_mappings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            workspace_id TEXT NOT NULL,
            source_status TEXT NOT NULL,
            target_status TEXT NOT NULL,
            backend_type TEXT NOT NULL,
            UNIQUE (workspace_id, source_status, backend_type)
        );
        "#,
    ),
];

/// Run all pending embedded migrations
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    create_migration_table(pool).await?;
    let applied = get_applied_migration_versions(pool).await?;

    let mut migrations_run = 0;
    for (version, description, sql) in MIGRATIONS {
        if applied.contains(version) {
            continue;
        }

        info!(version, "Running migration: {}", description);
        let start_time = std::time::Instant::now();

        let mut tx = pool.begin().await.map_err(|e| SourceplaneError::Database {
            source: e,
            context: "Failed to start migration transaction".to_string(),
        })?;

        sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(|e| {
            error!(error = %e, migration = description, "Migration failed");
            SourceplaneError::Database { source: e, context: format!("Migration failed: {}", description) }
        })?;

        sqlx::query(
            "INSERT INTO _sourceplane_migrations (version, description, checksum, execution_time, installed_on) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(version)
        .bind(description)
        .bind(calculate_checksum(sql))
        .bind(start_time.elapsed().as_millis() as i64)
        .bind(chrono::Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: format!("Failed to record migration: {}", description),
        })?;

        tx.commit().await.map_err(|e| SourceplaneError::Database {
            source: e,
            context: "Failed to commit migration transaction".to_string(),
        })?;

        migrations_run += 1;
    }

    if migrations_run > 0 {
        info!(count = migrations_run, "Database migrations completed");
    } else {
        info!("No pending migrations");
    }

    Ok(())
}

/// Highest applied migration version (0 when none)
pub async fn get_migration_version(pool: &DbPool) -> Result<i64> {
    Ok(get_applied_migration_versions(pool).await?.into_iter().max().unwrap_or(0))
}

async fn create_migration_table(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _sourceplane_migrations (
            version BIGINT PRIMARY KEY,
            description TEXT NOT NULL,
            checksum TEXT NOT NULL,
            execution_time BIGINT NOT NULL,
            installed_on TEXT NOT NULL
        )
    "#,
    )
    .execute(pool)
    .await
    .map_err(|e| SourceplaneError::Database {
        source: e,
        context: "Failed to create migration tracking table".to_string(),
    })?;

    Ok(())
}

async fn get_applied_migration_versions(pool: &DbPool) -> Result<Vec<i64>> {
    let rows = sqlx::query("SELECT version FROM _sourceplane_migrations ORDER BY version")
        .fetch_all(pool)
        .await
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: "Failed to get applied migrations".to_string(),
        })?;

    Ok(rows.into_iter().map(|row| row.get::<i64, _>("version")).collect())
}

/// Hex SHA-256 of the migration text
fn calculate_checksum(content: &str) -> String {
    ring::digest::digest(&ring::digest::SHA256, content.as_bytes())
        .as_ref()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> DbPool {
        SqlitePoolOptions::new().max_connections(1).connect("sqlite::memory:").await.unwrap()
    }

    #[test]
    fn test_calculate_checksum() {
        let first = calculate_checksum("CREATE TABLE a (id TEXT)");
        assert_eq!(first.len(), 64);
        assert_eq!(first, calculate_checksum("CREATE TABLE a (id TEXT)"));
        assert_ne!(first, calculate_checksum("CREATE TABLE b (id TEXT)"));
    }

    #[test]
    fn test_versions_are_ascending() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|(v, _, _)| *v).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
    }

    #[tokio::test]
    async fn test_run_migrations_is_idempotent() {
        let pool = memory_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        assert_eq!(get_migration_version(&pool).await.unwrap(), 2);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM status_mappings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
