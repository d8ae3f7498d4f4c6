//! Test database utilities for in-library tests.
//!
//! Each call returns a fresh in-memory SQLite database with the configuration
//! schema applied. The pool holds exactly one connection because every
//! in-memory connection is a separate database.
//!
//! This module is only available in test builds (`#[cfg(test)]`).

use crate::config::DatabaseConfig;
use crate::storage::{create_pool, DbPool};

/// Fresh in-memory configuration store with migrations applied
pub async fn memory_pool() -> DbPool {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        min_connections: 0,
        auto_migrate: true,
        ..Default::default()
    };
    create_pool(&config).await.expect("create in-memory test database")
}
