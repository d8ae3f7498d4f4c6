//! Common test utilities for all integration tests.
//!
//! Each [`TestStore`] is a file-backed SQLite configuration store in its own
//! temporary directory, with migrations applied. The directory is removed when
//! the store is dropped.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use chrono::{DateTime, Utc};
use serde_json::json;
use sourceplane::broadcast::BroadcastHub;
use sourceplane::config::{DatabaseConfig, ProviderConfig};
use sourceplane::domain::SourceType;
use sourceplane::services::{DataSourceService, SecretCipher, SecretCipherConfig};
use sourceplane::storage::{
    create_pool, CreateDataSourceRequest, DataSourceConfigRepository, DbPool,
    StatusMappingRepository, UpsertStatusMappingRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestStore {
    pub pool: DbPool,
    pub configs: DataSourceConfigRepository,
    pub mappings: StatusMappingRepository,
    _dir: TempDir,
}

impl TestStore {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("config.db");
        let config = DatabaseConfig {
            url: format!("sqlite://{}", path.display()),
            max_connections: 2,
            auto_migrate: true,
            ..Default::default()
        };
        let pool = create_pool(&config).await.expect("create test database pool");

        Self {
            configs: DataSourceConfigRepository::new(pool.clone()),
            mappings: StatusMappingRepository::new(pool.clone()),
            pool,
            _dir: dir,
        }
    }

    /// Insert an active row and return its id
    pub async fn add_source(
        &self,
        workspace_id: &str,
        source_type: SourceType,
        encrypted_secret: Option<String>,
        created_at: Option<DateTime<Utc>>,
    ) -> String {
        self.configs
            .create(CreateDataSourceRequest {
                workspace_id: workspace_id.to_string(),
                source_type,
                encrypted_secret,
                custom_queries: HashMap::new(),
                is_active: true,
                created_at,
            })
            .await
            .expect("insert data source")
            .id
    }

    pub async fn add_mapping(&self, workspace_id: &str, raw: &str, target: &str, backend: SourceType) {
        self.mappings
            .upsert(UpsertStatusMappingRequest {
                workspace_id: workspace_id.to_string(),
                source_status: raw.to_string(),
                target_status: target.to_string(),
                backend_type: backend,
            })
            .await
            .expect("upsert status mapping");
    }

    pub fn service(&self, cipher: Arc<SecretCipher>, settings: ProviderConfig) -> DataSourceService {
        DataSourceService::with_sqlx(
            self.pool.clone(),
            cipher,
            settings,
            Arc::new(BroadcastHub::default()),
        )
    }
}

/// Cipher under a fresh random key
pub fn fresh_cipher() -> SecretCipher {
    let key = SecretCipher::generate_key().expect("generate key");
    SecretCipher::new(&SecretCipherConfig::new(key)).expect("build cipher")
}

/// Fast-failing provider settings for tests
pub fn fast_settings() -> ProviderConfig {
    ProviderConfig {
        connect_timeout_seconds: 1,
        command_timeout_seconds: 5,
        retry_delay_ms: 1,
        ..Default::default()
    }
}

/// Connection secret for an HTTP API backend at `base_url`
pub fn http_secret(base_url: &str) -> String {
    json!({ "base_url": base_url, "bearer_token": "integration-token" }).to_string()
}
