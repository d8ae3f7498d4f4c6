//! # Storage and Persistence
//!
//! Access to the configuration store: data source rows and status mappings.

pub mod migrations;
pub mod pool;
pub mod repositories;
pub mod store;

#[cfg(test)]
pub mod test_helpers;

pub use crate::config::DatabaseConfig;

pub use migrations::{get_migration_version, run_migrations};
pub use pool::{create_pool, get_pool_stats, DbPool, PoolStats};
pub use repositories::{
    CreateDataSourceRequest, DataSourceConfigRepository, StatusMappingRepository,
    UpsertStatusMappingRequest,
};
pub use store::{DataSourceConfigStore, StatusMappingStore};

use crate::errors::{Result, SourceplaneError};

/// Check database connectivity
pub async fn check_connection(pool: &DbPool) -> Result<()> {
    sqlx::query("SELECT 1").fetch_one(pool).await.map_err(|e| SourceplaneError::Database {
        source: e,
        context: "Database connectivity check failed".to_string(),
    })?;

    Ok(())
}
