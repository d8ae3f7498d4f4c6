//! Status mapping repository
//!
//! Rows map a raw backend status onto a canonical status for one workspace and
//! backend type. The table is written by administrators; the core only reads.

use crate::domain::{CanonicalStatus, SourceType, StatusMapping};
use crate::errors::{Result, SourceplaneError};
use crate::storage::{DbPool, StatusMappingStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use tracing::{instrument, warn};

#[derive(Debug, Clone, FromRow)]
struct StatusMappingRow {
    pub workspace_id: String,
    pub source_status: String,
    pub target_status: String,
    pub backend_type: String,
}

/// Request to create or replace a status mapping.
///
/// The target is kept as text; rows with an unusable target are skipped on read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertStatusMappingRequest {
    pub workspace_id: String,
    pub source_status: String,
    pub target_status: String,
    pub backend_type: SourceType,
}

/// Repository for status mapping persistence.
#[derive(Debug, Clone)]
pub struct StatusMappingRepository {
    pool: DbPool,
}

impl StatusMappingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert a mapping, replacing the target of an existing
    /// (workspace, source_status, backend_type) row.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace_id, backend_type = %request.backend_type), name = "db_upsert_status_mapping")]
    pub async fn upsert(&self, request: UpsertStatusMappingRequest) -> Result<()> {
        sqlx::query(
            "INSERT INTO status_mappings (workspace_id, source_status, target_status, backend_type) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (workspace_id, source_status, backend_type) DO UPDATE SET target_status = excluded.target_status",
        )
        .bind(&request.workspace_id)
        .bind(&request.source_status)
        .bind(&request.target_status)
        .bind(request.backend_type.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: format!(
                "Failed to upsert status mapping for workspace '{}'",
                request.workspace_id
            ),
        })?;
        Ok(())
    }
}

#[async_trait]
impl StatusMappingStore for StatusMappingRepository {
    #[instrument(skip(self), name = "db_list_status_mappings")]
    async fn list_for_workspace(
        &self,
        workspace_id: &str,
        backend_type: SourceType,
    ) -> Result<Vec<StatusMapping>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, StatusMappingRow>(
            "SELECT workspace_id, source_status, target_status, backend_type FROM status_mappings WHERE workspace_id = $1 ORDER BY id",
        )
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: format!("Failed to list status mappings for workspace '{}'", workspace_id),
        })?;

        let mut mappings = Vec::new();
        for row in rows {
            // Legacy rows may spell the backend type with an alias
            match row.backend_type.parse::<SourceType>() {
                Ok(row_type) if row_type == backend_type => {}
                Ok(_) => continue,
                Err(_) => {
                    warn!(workspace_id = %row.workspace_id, backend_type = %row.backend_type, "Skipping status mapping with unknown backend type");
                    continue;
                }
            }

            match row.target_status.parse::<CanonicalStatus>() {
                Ok(target_status) if target_status.is_mapping_target() => {
                    mappings.push(StatusMapping {
                        workspace_id: row.workspace_id,
                        source_status: row.source_status,
                        target_status,
                        backend_type,
                    });
                }
                _ => {
                    warn!(
                        workspace_id = %row.workspace_id,
                        source_status = %row.source_status,
                        target_status = %row.target_status,
                        "Skipping status mapping with invalid target"
                    );
                }
            }
        }

        Ok(mappings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::memory_pool;

    fn upsert(source: &str, target: &str, backend: SourceType) -> UpsertStatusMappingRequest {
        UpsertStatusMappingRequest {
            workspace_id: "ws-1".to_string(),
            source_status: source.to_string(),
            target_status: target.to_string(),
            backend_type: backend,
        }
    }

    #[tokio::test]
    async fn test_list_filters_by_backend_type() {
        let repo = StatusMappingRepository::new(memory_pool().await);
        repo.upsert(upsert("RUN", "ACTIVE", SourceType::MySql)).await.unwrap();
        repo.upsert(upsert("E-STOP", "STOP", SourceType::HttpApi)).await.unwrap();

        let mysql = repo.list_for_workspace("ws-1", SourceType::MySql).await.unwrap();
        assert_eq!(mysql.len(), 1);
        assert_eq!(mysql[0].source_status, "RUN");
        assert_eq!(mysql[0].target_status, CanonicalStatus::Active);

        assert!(repo.list_for_workspace("ws-2", SourceType::MySql).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_target() {
        let repo = StatusMappingRepository::new(memory_pool().await);
        repo.upsert(upsert("idle", "PAUSE", SourceType::Postgres)).await.unwrap();
        repo.upsert(upsert("idle", "STOP", SourceType::Postgres)).await.unwrap();

        let mappings = repo.list_for_workspace("ws-1", SourceType::Postgres).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].target_status, CanonicalStatus::Stop);
    }

    #[tokio::test]
    async fn test_invalid_targets_skipped() {
        let repo = StatusMappingRepository::new(memory_pool().await);
        repo.upsert(upsert("weird", "BROKEN", SourceType::Postgres)).await.unwrap();
        repo.upsert(upsert("odd", "UNKNOWN", SourceType::Postgres)).await.unwrap();
        repo.upsert(upsert("ok", "pause", SourceType::Postgres)).await.unwrap();

        let mappings = repo.list_for_workspace("ws-1", SourceType::Postgres).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].source_status, "ok");
    }
}
