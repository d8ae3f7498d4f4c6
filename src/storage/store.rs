//! Configuration store seams
//!
//! The resolver and normalizer read configuration through these traits so
//! tests and alternative stores can stand in for the SQLite repositories.

use crate::domain::{DataSourceConfig, SourceType, StatusMapping};
use crate::errors::Result;
use async_trait::async_trait;

/// Read access to data source configuration rows, plus the single write path
/// used when a secret is re-encrypted under the current key
#[async_trait]
pub trait DataSourceConfigStore: Send + Sync {
    /// Look up one row by id, regardless of workspace or active flag
    async fn get_by_id(&self, id: &str) -> Result<Option<DataSourceConfig>>;

    /// Oldest active row for a workspace (created_at ascending, then id)
    async fn oldest_active(&self, workspace_id: &str) -> Result<Option<DataSourceConfig>>;

    /// Every row, active or not
    async fn list_all(&self) -> Result<Vec<DataSourceConfig>>;

    /// Replace the stored secret of one row
    async fn update_encrypted_secret(&self, id: &str, encrypted_secret: &str) -> Result<()>;
}

/// Read access to per-workspace status mappings
#[async_trait]
pub trait StatusMappingStore: Send + Sync {
    async fn list_for_workspace(
        &self,
        workspace_id: &str,
        backend_type: SourceType,
    ) -> Result<Vec<StatusMapping>>;
}
