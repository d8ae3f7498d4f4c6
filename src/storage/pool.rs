//! # Database Connection Pool Management
//!
//! Connection pool for the configuration store tables.

use crate::config::DatabaseConfig;
use crate::errors::{Result, SourceplaneError};
use crate::utils::sanitize_url;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    Pool, Sqlite,
};
use std::{str::FromStr, time::Duration};

/// Type alias for the database connection pool
pub type DbPool = Pool<Sqlite>;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Create a database connection pool with the specified configuration
pub async fn create_pool(config: &DatabaseConfig) -> Result<DbPool> {
    validate_config(config)?;

    // Every in-memory connection is its own database
    let max_connections = if config.is_in_memory() { 1 } else { config.max_connections };

    let pool_options = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(max_connections)
        .min_connections(config.min_connections.min(max_connections))
        .acquire_timeout(config.connect_timeout())
        .test_before_acquire(true);

    let pool_options = if config.is_in_memory() {
        pool_options.idle_timeout(None).max_lifetime(None)
    } else if let Some(idle_timeout) = config.idle_timeout() {
        pool_options.idle_timeout(idle_timeout)
    } else {
        pool_options
    };

    let connect_options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: format!("Invalid SQLite connection string: {}", sanitize_url(&config.url)),
        })?
        .create_if_missing(true)
        .busy_timeout(SQLITE_BUSY_TIMEOUT);

    let connect_options = if config.is_in_memory() {
        connect_options
    } else {
        connect_options.journal_mode(SqliteJournalMode::Wal)
    };

    let pool = pool_options.connect_with(connect_options).await.map_err(|e| {
        tracing::error!(
            error = %e,
            url = %sanitize_url(&config.url),
            busy_timeout_ms = SQLITE_BUSY_TIMEOUT.as_millis(),
            "Failed to create SQLite database pool"
        );
        SourceplaneError::Database {
            source: e,
            context: format!("Failed to connect to database: {}", sanitize_url(&config.url)),
        }
    })?;

    tracing::info!(
        max_connections,
        min_connections = config.min_connections,
        connect_timeout_ms = config.connect_timeout().as_millis(),
        idle_timeout_ms = config.idle_timeout().map(|d| d.as_millis()),
        "Database connection pool created"
    );

    if config.auto_migrate {
        tracing::info!("Auto-migration enabled, creating configuration tables");
        crate::storage::migrations::run_migrations(&pool).await?;
    }

    Ok(pool)
}

/// Validate database configuration
fn validate_config(config: &DatabaseConfig) -> Result<()> {
    if config.max_connections == 0 {
        return Err(SourceplaneError::validation("max_connections must be greater than 0"));
    }

    if config.min_connections > config.max_connections {
        return Err(SourceplaneError::validation(
            "min_connections cannot be greater than max_connections",
        ));
    }

    if config.url.is_empty() {
        return Err(SourceplaneError::validation("database URL cannot be empty"));
    }

    if !config.url.starts_with("sqlite:") {
        return Err(SourceplaneError::validation("database URL must start with 'sqlite:'"));
    }

    Ok(())
}

/// Get pool statistics for monitoring
pub fn get_pool_stats(pool: &DbPool) -> PoolStats {
    PoolStats { size: pool.size(), idle: pool.num_idle() }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Total connections in the pool
    pub size: u32,
    /// Number of idle connections
    pub idle: usize,
}

impl PoolStats {
    /// Get the number of active connections
    pub fn active(&self) -> u32 {
        self.size.saturating_sub(self.idle as u32)
    }
}
