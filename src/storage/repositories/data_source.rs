//! Data source configuration repository
//!
//! One row per workspace data source. Rows are never hard-deleted; the
//! administrative side toggles `is_active` instead. The only write the core
//! performs is replacing `encrypted_secret` after key-rotation recovery.

use crate::domain::{DataSourceConfig, SourceType};
use crate::errors::{Result, SourceplaneError};
use crate::storage::{DataSourceConfigStore, DbPool};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use tracing::instrument;

const SELECT_COLUMNS: &str =
    "SELECT id, workspace_id, source_type, encrypted_secret, custom_queries, is_active, created_at FROM data_source_configs";

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Internal database row structure for data source configurations.
#[derive(Debug, Clone, FromRow)]
struct DataSourceConfigRow {
    pub id: String,
    pub workspace_id: String,
    pub source_type: String,
    pub encrypted_secret: Option<String>,
    pub custom_queries: Option<String>,
    pub is_active: bool,
    pub created_at: String,
}

impl TryFrom<DataSourceConfigRow> for DataSourceConfig {
    type Error = SourceplaneError;

    fn try_from(row: DataSourceConfigRow) -> Result<Self> {
        let source_type = row.source_type.parse::<SourceType>().map_err(|e| {
            SourceplaneError::config_for(
                format!("Data source {}: {}", row.id, e),
                row.workspace_id.clone(),
            )
        })?;

        let custom_queries = match row.custom_queries.as_deref().map(str::trim) {
            None | Some("") | Some("null") => HashMap::new(),
            Some(raw) => serde_json::from_str::<HashMap<String, String>>(raw).map_err(|e| {
                SourceplaneError::config_for(
                    format!("Data source {} has invalid custom_queries JSON: {}", row.id, e),
                    row.workspace_id.clone(),
                )
            })?,
        };

        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                SourceplaneError::internal(format!(
                    "Data source {} has invalid created_at '{}': {}",
                    row.id, row.created_at, e
                ))
            })?;

        Ok(Self {
            id: row.id,
            workspace_id: row.workspace_id,
            source_type,
            encrypted_secret: row.encrypted_secret,
            custom_queries,
            is_active: row.is_active,
            created_at,
        })
    }
}

/// Request to create a data source configuration row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDataSourceRequest {
    pub workspace_id: String,
    pub source_type: SourceType,
    pub encrypted_secret: Option<String>,
    #[serde(default)]
    pub custom_queries: HashMap<String, String>,
    pub is_active: bool,
    /// Defaults to now
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Repository for data source configuration persistence.
#[derive(Debug, Clone)]
pub struct DataSourceConfigRepository {
    pool: DbPool,
}

impl DataSourceConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates a new configuration row.
    #[instrument(skip(self, request), fields(workspace_id = %request.workspace_id, source_type = %request.source_type), name = "db_create_data_source")]
    pub async fn create(&self, request: CreateDataSourceRequest) -> Result<DataSourceConfig> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = request.created_at.unwrap_or_else(Utc::now);
        let custom_queries = serde_json::to_string(&request.custom_queries)?;

        sqlx::query(
            "INSERT INTO data_source_configs (id, workspace_id, source_type, encrypted_secret, custom_queries, is_active, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&id)
        .bind(&request.workspace_id)
        .bind(request.source_type.as_str())
        .bind(&request.encrypted_secret)
        .bind(&custom_queries)
        .bind(request.is_active)
        .bind(format_timestamp(created_at))
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, workspace_id = %request.workspace_id, "Failed to create data source");
            SourceplaneError::Database {
                source: e,
                context: format!(
                    "Failed to create data source for workspace '{}'",
                    request.workspace_id
                ),
            }
        })?;

        tracing::info!(data_source_id = %id, workspace_id = %request.workspace_id, "Created data source configuration");

        self.get_by_id(&id).await?.ok_or_else(|| {
            SourceplaneError::internal(format!("Data source {} missing after insert", id))
        })
    }

    /// Toggle the active flag of a row.
    #[instrument(skip(self), name = "db_set_data_source_active")]
    pub async fn set_active(&self, id: &str, is_active: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE data_source_configs SET is_active = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(is_active)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: format!("Failed to update active flag of data source '{}'", id),
        })?;

        if result.rows_affected() == 0 {
            return Err(SourceplaneError::validation(format!("Data source '{}' not found", id)));
        }
        Ok(())
    }
}

#[async_trait]
impl DataSourceConfigStore for DataSourceConfigRepository {
    #[instrument(skip(self), fields(data_source_id = %id), name = "db_get_data_source")]
    async fn get_by_id(&self, id: &str) -> Result<Option<DataSourceConfig>> {
        let row = sqlx::query_as::<sqlx::Sqlite, DataSourceConfigRow>(&format!(
            "{} WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, data_source_id = %id, "Failed to get data source by ID");
            SourceplaneError::Database {
                source: e,
                context: format!("Failed to get data source with ID '{}'", id),
            }
        })?;

        row.map(DataSourceConfig::try_from).transpose()
    }

    /// Rows may carry any RFC 3339 offset, so the text column does not sort by
    /// instant. Active rows are compared on the parsed timestamp, then id.
    /// An unreadable active row fails the lookup rather than being skipped.
    #[instrument(skip(self), fields(workspace_id = %workspace_id), name = "db_oldest_active_data_source")]
    async fn oldest_active(&self, workspace_id: &str) -> Result<Option<DataSourceConfig>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, DataSourceConfigRow>(&format!(
            "{} WHERE workspace_id = $1 AND is_active = TRUE",
            SELECT_COLUMNS
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, workspace_id = %workspace_id, "Failed to get active data source");
            SourceplaneError::Database {
                source: e,
                context: format!("Failed to get active data source for workspace '{}'", workspace_id),
            }
        })?;

        let configs = rows
            .into_iter()
            .map(DataSourceConfig::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(configs.into_iter().min_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id))))
    }

    #[instrument(skip(self), name = "db_list_data_sources")]
    async fn list_all(&self) -> Result<Vec<DataSourceConfig>> {
        let rows = sqlx::query_as::<sqlx::Sqlite, DataSourceConfigRow>(&format!(
            "{} ORDER BY created_at ASC, id ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| SourceplaneError::Database {
            source: e,
            context: "Failed to list data sources".to_string(),
        })?;

        let mut configs = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id.clone();
            match DataSourceConfig::try_from(row) {
                Ok(config) => configs.push(config),
                Err(e) => tracing::warn!(data_source_id = %id, error = %e, "Skipping unreadable data source row"),
            }
        }
        Ok(configs)
    }

    #[instrument(skip(self, encrypted_secret), fields(data_source_id = %id), name = "db_update_data_source_secret")]
    async fn update_encrypted_secret(&self, id: &str, encrypted_secret: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE data_source_configs SET encrypted_secret = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(encrypted_secret)
        .bind(format_timestamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, data_source_id = %id, "Failed to update data source secret");
            SourceplaneError::Database {
                source: e,
                context: format!("Failed to update secret of data source '{}'", id),
            }
        })?;

        if result.rows_affected() == 0 {
            return Err(SourceplaneError::validation(format!("Data source '{}' not found", id)));
        }

        tracing::info!(data_source_id = %id, "Stored re-encrypted data source secret");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_helpers::memory_pool;
    use chrono::Duration;

    fn request(workspace_id: &str, source_type: SourceType) -> CreateDataSourceRequest {
        CreateDataSourceRequest {
            workspace_id: workspace_id.to_string(),
            source_type,
            encrypted_secret: Some("enc:v1:abc".to_string()),
            custom_queries: HashMap::new(),
            is_active: true,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let repo = DataSourceConfigRepository::new(memory_pool().await);
        let mut req = request("ws-1", SourceType::MySql);
        req.custom_queries.insert("equipment_status".into(), "SELECT 1".into());

        let created = repo.create(req).await.unwrap();
        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.workspace_id, "ws-1");
        assert_eq!(fetched.source_type, SourceType::MySql);
        assert_eq!(fetched.custom_query("equipment_status"), Some("SELECT 1"));
        assert!(repo.get_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oldest_active_wins() {
        let repo = DataSourceConfigRepository::new(memory_pool().await);
        let t1 = Utc::now() - Duration::minutes(10);
        let t2 = Utc::now();

        let mut newer = request("ws-1", SourceType::MySql);
        newer.created_at = Some(t2);
        repo.create(newer).await.unwrap();

        let mut older = request("ws-1", SourceType::Postgres);
        older.created_at = Some(t1);
        let older = repo.create(older).await.unwrap();

        let mut oldest_inactive = request("ws-1", SourceType::HttpApi);
        oldest_inactive.created_at = Some(t1 - Duration::minutes(5));
        oldest_inactive.is_active = false;
        repo.create(oldest_inactive).await.unwrap();

        let picked = repo.oldest_active("ws-1").await.unwrap().unwrap();
        assert_eq!(picked.id, older.id);
        assert_eq!(picked.source_type, SourceType::Postgres);
        assert!(repo.oldest_active("ws-2").await.unwrap().is_none());
    }

    async fn insert_raw(pool: &DbPool, id: &str, source_type: &str, created_at: &str) {
        sqlx::query(
            "INSERT INTO data_source_configs (id, workspace_id, source_type, encrypted_secret, custom_queries, is_active, created_at, updated_at) VALUES ($1, 'ws-tz', $2, NULL, '{}', TRUE, $3, $4)",
        )
        .bind(id)
        .bind(source_type)
        .bind(created_at)
        .bind(created_at)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_oldest_active_compares_instants_across_offsets() {
        let pool = memory_pool().await;
        // 00:00Z written with a +09:00 offset sorts after 01:00Z as text
        insert_raw(&pool, "ds-a", "postgresql", "2024-01-01T09:00:00+09:00").await;
        insert_raw(&pool, "ds-b", "mysql", "2024-01-01T01:00:00Z").await;
        insert_raw(&pool, "ds-c", "mysql", "2023-12-31T20:00:00-03:00").await;

        let repo = DataSourceConfigRepository::new(pool);
        let picked = repo.oldest_active("ws-tz").await.unwrap().unwrap();
        assert_eq!(picked.id, "ds-a");
        assert_eq!(picked.source_type, SourceType::Postgres);
    }

    #[tokio::test]
    async fn test_oldest_active_ties_break_on_id() {
        let pool = memory_pool().await;
        insert_raw(&pool, "ds-2", "mysql", "2024-01-01T00:00:00Z").await;
        insert_raw(&pool, "ds-1", "postgresql", "2024-01-01T02:00:00+02:00").await;

        let repo = DataSourceConfigRepository::new(pool);
        assert_eq!(repo.oldest_active("ws-tz").await.unwrap().unwrap().id, "ds-1");
    }

    #[tokio::test]
    async fn test_placeholder_workspace_ids_round_trip() {
        let repo = DataSourceConfigRepository::new(memory_pool().await);
        repo.create(request("default-workspace", SourceType::HttpApi)).await.unwrap();
        let picked = repo.oldest_active("default-workspace").await.unwrap().unwrap();
        assert_eq!(picked.workspace_id, "default-workspace");
    }

    #[tokio::test]
    async fn test_update_secret_and_toggle_active() {
        let repo = DataSourceConfigRepository::new(memory_pool().await);
        let created = repo.create(request("ws-1", SourceType::Postgres)).await.unwrap();

        repo.update_encrypted_secret(&created.id, "enc:v1:new").await.unwrap();
        repo.set_active(&created.id, false).await.unwrap();

        let fetched = repo.get_by_id(&created.id).await.unwrap().unwrap();
        assert_eq!(fetched.encrypted_secret.as_deref(), Some("enc:v1:new"));
        assert!(!fetched.is_active);
        assert!(repo.oldest_active("ws-1").await.unwrap().is_none());

        assert!(repo.update_encrypted_secret("missing", "x").await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_source_type_is_configuration_error() {
        let pool = memory_pool().await;
        sqlx::query(
            "INSERT INTO data_source_configs (id, workspace_id, source_type, encrypted_secret, custom_queries, is_active, created_at, updated_at) VALUES ('ds-x', 'ws-1', 'oracle', NULL, '{}', TRUE, '2024-01-01T00:00:00.000000Z', '2024-01-01T00:00:00.000000Z')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let repo = DataSourceConfigRepository::new(pool);
        let err = repo.get_by_id("ds-x").await.unwrap_err();
        assert!(err.is_configuration_error());

        // Unreadable rows are skipped when listing
        assert!(repo.list_all().await.unwrap().is_empty());
    }
}
