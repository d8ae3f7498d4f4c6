//! Caller-facing operations
//!
//! Every read opens its own resolver session and closes it before returning.
//! Callers are expected to have authorized the workspace already.

use crate::broadcast::{BroadcastHub, SubscriberId, Subscription};
use crate::config::ProviderConfig;
use crate::domain::{EquipmentStatusPage, Measurement, QueryFilter, Row};
use crate::errors::Result;
use crate::providers::{guard, BackendProvider, ConnectionTestResult, DataProvider, ProviderContext};
use crate::services::resolver::{DataSourceResolver, ProviderHandle, ResolverSession};
use crate::services::secret_cipher::SecretCipher;
use crate::storage::{
    DataSourceConfigRepository, DataSourceConfigStore, DbPool, StatusMappingRepository,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Counts from a bulk re-encryption pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReencryptionReport {
    /// Rows written back under the current key
    pub rewritten: usize,
    /// Rows already under the current key
    pub current: usize,
    /// Rows whose secret could not be opened or written
    pub failed: usize,
}

/// Data source operations for the routing layer, monitor and CLI
#[derive(Clone)]
pub struct DataSourceService {
    resolver: DataSourceResolver,
    configs: Arc<dyn DataSourceConfigStore>,
    cipher: Arc<SecretCipher>,
    hub: Arc<BroadcastHub>,
}

impl std::fmt::Debug for DataSourceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceService")
            .field("resolver", &self.resolver)
            .field("subscribers", &self.hub.total_subscribers())
            .finish()
    }
}

impl DataSourceService {
    pub fn new(
        resolver: DataSourceResolver,
        configs: Arc<dyn DataSourceConfigStore>,
        cipher: Arc<SecretCipher>,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        Self { resolver, configs, cipher, hub }
    }

    /// Wire the service over the SQLite configuration store
    pub fn with_sqlx(
        pool: DbPool,
        cipher: Arc<SecretCipher>,
        settings: ProviderConfig,
        hub: Arc<BroadcastHub>,
    ) -> Self {
        let configs: Arc<dyn DataSourceConfigStore> =
            Arc::new(DataSourceConfigRepository::new(pool.clone()));
        let resolver = DataSourceResolver::new(
            Arc::clone(&configs),
            Arc::new(StatusMappingRepository::new(pool)),
            Arc::clone(&cipher),
            settings,
        );
        Self::new(resolver, configs, cipher, hub)
    }

    pub fn resolver(&self) -> &DataSourceResolver {
        &self.resolver
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Resolve and connect, retrying once when the backend is unavailable
    async fn open(
        &self,
        session: &mut ResolverSession,
        workspace_id: &str,
        data_source_id: Option<&str>,
    ) -> Result<Arc<ProviderHandle>> {
        match session.resolve(workspace_id, data_source_id).await {
            Err(e) if e.is_retryable() => {
                warn!(workspace_id = %workspace_id, error = %e, "Provider unavailable, retrying once");
                tokio::time::sleep(self.resolver.settings().retry_delay()).await;
                session.resolve(workspace_id, data_source_id).await
            }
            other => other,
        }
    }

    #[instrument(skip(self, filter))]
    pub async fn equipment_status(
        &self,
        workspace_id: &str,
        data_source_id: Option<&str>,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<EquipmentStatusPage> {
        let mut session = self.resolver.session();
        let result = match self.open(&mut session, workspace_id, data_source_id).await {
            Ok(handle) => handle.equipment_status(filter, limit).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    #[instrument(skip(self, filter))]
    pub async fn measurement_data(
        &self,
        workspace_id: &str,
        data_source_id: Option<&str>,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>> {
        let mut session = self.resolver.session();
        let result = match self.open(&mut session, workspace_id, data_source_id).await {
            Ok(handle) => handle.measurement_data(filter, limit).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    /// Denylist-gated statement against the workspace's active data source.
    ///
    /// Rejected statements never cause a connection to be opened.
    #[instrument(skip(self, statement))]
    pub async fn execute_sql(&self, workspace_id: &str, statement: &str) -> Result<Vec<Row>> {
        guard::check_statement(statement, workspace_id)?;

        let mut session = self.resolver.session();
        let result = match self.open(&mut session, workspace_id, None).await {
            Ok(handle) => handle.execute_sql(statement).await,
            Err(e) => Err(e),
        };
        session.close().await;
        result
    }

    /// Round-trip check. Unreachable backends are reported in the result;
    /// missing or undecryptable configuration is an error.
    #[instrument(skip(self))]
    pub async fn test_connection(
        &self,
        workspace_id: &str,
        data_source_id: Option<&str>,
    ) -> Result<ConnectionTestResult> {
        let source = self.resolver.resolve_source(workspace_id, data_source_id).await?;
        let ctx = ProviderContext::new(workspace_id, self.resolver.settings().clone())
            .with_custom_queries(source.custom_queries.clone());
        let provider = BackendProvider::build(source.source_type, source.secret(), ctx)?;

        let result = provider.test_connection().await;
        provider.disconnect().await;
        Ok(result)
    }

    pub fn subscribe(&self, workspace_id: &str) -> Subscription {
        self.hub.subscribe(workspace_id)
    }

    pub fn unsubscribe(&self, subscriber_id: &SubscriberId) -> bool {
        self.hub.unsubscribe(subscriber_id)
    }

    /// Rewrite every stored secret under the current key.
    ///
    /// Legacy plaintext rows are encrypted when they parse as a connection
    /// secret for their source type. Rows that no candidate key opens, and
    /// unencrypted values that are not connection secrets, are left untouched
    /// and counted as failed.
    pub async fn reencrypt_all_secrets(&self) -> Result<ReencryptionReport> {
        let mut report = ReencryptionReport::default();

        for row in self.configs.list_all().await? {
            let stored = row.encrypted_secret.as_deref().map(str::trim).unwrap_or_default();

            let rewrite = if stored.is_empty() {
                warn!(data_source_id = %row.id, workspace_id = %row.workspace_id, "Data source has no secret");
                report.failed += 1;
                continue;
            } else if !SecretCipher::is_encrypted(stored) {
                if !BackendProvider::is_connection_secret(row.source_type, stored) {
                    warn!(
                        data_source_id = %row.id,
                        workspace_id = %row.workspace_id,
                        "Unencrypted secret is not a connection secret for its source type"
                    );
                    report.failed += 1;
                    continue;
                }
                self.cipher.encrypt(stored)
            } else {
                match self.cipher.recover(Some(stored)) {
                    Ok(recovered) => match recovered.reencrypted {
                        Some(reencrypted) => Ok(reencrypted),
                        None => {
                            report.current += 1;
                            continue;
                        }
                    },
                    Err(reason) => {
                        warn!(
                            data_source_id = %row.id,
                            workspace_id = %row.workspace_id,
                            reason = %reason,
                            "Secret could not be opened with any known key"
                        );
                        report.failed += 1;
                        continue;
                    }
                }
            };

            let written = match rewrite {
                Ok(envelope) => self.configs.update_encrypted_secret(&row.id, &envelope).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => report.rewritten += 1,
                Err(e) => {
                    warn!(data_source_id = %row.id, error = %e, "Failed to rewrite secret");
                    report.failed += 1;
                }
            }
        }

        info!(
            rewritten = report.rewritten,
            current = report.current,
            failed = report.failed,
            "Secret re-encryption complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceType;
    use crate::errors::SourceplaneError;
    use crate::services::secret_cipher::SecretCipherConfig;
    use crate::storage::test_helpers::memory_pool;
    use crate::storage::CreateDataSourceRequest;
    use std::collections::HashMap;

    async fn service_with(cipher: SecretCipher) -> (DataSourceService, DataSourceConfigRepository) {
        let pool = memory_pool().await;
        let service = DataSourceService::with_sqlx(
            pool.clone(),
            Arc::new(cipher),
            ProviderConfig { retry_delay_ms: 1, connect_timeout_seconds: 1, ..Default::default() },
            Arc::new(BroadcastHub::default()),
        );
        (service, DataSourceConfigRepository::new(pool))
    }

    async fn add(repo: &DataSourceConfigRepository, workspace: &str, secret: Option<String>) -> String {
        repo.create(CreateDataSourceRequest {
            workspace_id: workspace.to_string(),
            source_type: SourceType::Postgres,
            encrypted_secret: secret,
            custom_queries: HashMap::new(),
            is_active: true,
            created_at: None,
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_denied_statement_rejected_before_resolving() {
        let (service, _) = service_with(SecretCipher::new(&SecretCipherConfig::for_testing()).unwrap()).await;
        // No data source exists, so reaching the resolver would be a configuration error
        let err = service.execute_sql("ws-1", "TRUNCATE equipment").await.unwrap_err();
        assert!(matches!(err, SourceplaneError::Security { .. }));

        let err = service.execute_sql("ws-1", "SELECT 1").await.unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[tokio::test]
    async fn test_reencrypt_all_secrets_counts() {
        let old_key = SecretCipher::generate_key().unwrap();
        let new_key = SecretCipher::generate_key().unwrap();
        let old = SecretCipher::new(&SecretCipherConfig::new(old_key.clone())).unwrap();
        let foreign = SecretCipher::new(&SecretCipherConfig::new(SecretCipher::generate_key().unwrap())).unwrap();
        let current = SecretCipher::new(
            &SecretCipherConfig::new(new_key.clone()).with_previous_keys(vec![old_key]),
        )
        .unwrap();
        let current_envelope = current.encrypt("postgres://u:p@a/db").unwrap();

        let (service, repo) = service_with(current).await;
        let rotated = add(&repo, "ws-1", Some(old.encrypt("postgres://u:p@b/db").unwrap())).await;
        let legacy = add(&repo, "ws-2", Some("postgres://u:p@c/db".into())).await;
        add(&repo, "ws-3", Some(current_envelope)).await;
        add(&repo, "ws-4", Some(foreign.encrypt("postgres://u:p@d/db").unwrap())).await;
        add(&repo, "ws-5", None).await;

        let garbage = add(&repo, "ws-6", Some("gAAAAABlZ3Vhcm1fYmFzZTY0X2NpcGhlcnRleHQ=".into())).await;

        let report = service.reencrypt_all_secrets().await.unwrap();
        assert_eq!(report, ReencryptionReport { rewritten: 2, current: 1, failed: 3 });
        let untouched = repo.get_by_id(&garbage).await.unwrap().unwrap();
        assert_eq!(
            untouched.encrypted_secret.as_deref(),
            Some("gAAAAABlZ3Vhcm1fYmFzZTY0X2NpcGhlcnRleHQ=")
        );

        let only_new = SecretCipher::new(&SecretCipherConfig::new(new_key)).unwrap();
        for (id, expected) in [(rotated, "postgres://u:p@b/db"), (legacy, "postgres://u:p@c/db")] {
            let row = repo.get_by_id(&id).await.unwrap().unwrap();
            assert_eq!(only_new.decrypt(row.encrypted_secret.as_deref()).unwrap(), expected);
        }

        let again = service.reencrypt_all_secrets().await.unwrap();
        assert_eq!(again, ReencryptionReport { rewritten: 0, current: 3, failed: 3 });
    }

    #[tokio::test]
    async fn test_connection_failure_is_reported_not_raised() {
        let cipher = SecretCipher::new(&SecretCipherConfig::for_testing()).unwrap();
        let secret = cipher.encrypt("postgres://u:p@127.0.0.1:1/db").unwrap();
        let (service, repo) = service_with(cipher).await;
        add(&repo, "ws-1", Some(secret)).await;

        let result = service.test_connection("ws-1", None).await.unwrap();
        assert!(!result.success);

        assert!(service.test_connection("ws-none", None).await.unwrap_err().is_configuration_error());
    }

    #[tokio::test]
    async fn test_subscribe_round_trip() {
        let (service, _) = service_with(SecretCipher::new(&SecretCipherConfig::for_testing()).unwrap()).await;
        let sub = service.subscribe("ws-1");
        assert_eq!(service.hub().subscriber_count("ws-1"), 1);
        assert!(service.unsubscribe(&sub.id));
        assert!(!service.unsubscribe(&sub.id));
    }
}
