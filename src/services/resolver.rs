//! # Dynamic Provider Resolver
//!
//! Turns "the data source for workspace W" into a connected provider:
//!
//! 1. an explicit data source id must belong to W and be active, otherwise
//!    the oldest active row of W is used;
//! 2. with no row at all, the configured default relational connection is
//!    used (an error when none is configured);
//! 3. the stored secret is decrypted. A secret that only opens with a previous
//!    key is re-encrypted and written back. A value without the envelope is
//!    accepted as legacy plaintext only when it parses as a connection secret
//!    for the row's source type. Anything else is a configuration error and
//!    is never used as plaintext;
//! 4. the provider for the source type is built and connected.
//!
//! Handles are cached per [`ResolverSession`], which lives for one request or
//! one monitor cycle.

use crate::config::ProviderConfig;
use crate::domain::{DataSourceConfig, SourceType};
use crate::errors::{Result, SourceplaneError};
use crate::observability::MetricsRecorder;
use crate::providers::{BackendProvider, DataProvider, ProviderContext};
use crate::services::secret_cipher::{DecryptError, SecretCipher};
use crate::services::status_normalizer::StatusNormalizer;
use crate::storage::{DataSourceConfigStore, StatusMappingStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use zeroize::Zeroizing;

/// Where a resolved connection came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    /// A configuration row
    Configured,
    /// No row exists; the process-wide default connection
    WorkspaceDefault,
}

/// Decrypted connection material for one workspace
pub struct ResolvedSource {
    pub workspace_id: String,
    pub data_source_id: Option<String>,
    pub source_type: SourceType,
    pub origin: SourceOrigin,
    pub custom_queries: HashMap<String, String>,
    secret: Zeroizing<String>,
}

impl ResolvedSource {
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl std::fmt::Debug for ResolvedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSource")
            .field("workspace_id", &self.workspace_id)
            .field("data_source_id", &self.data_source_id)
            .field("source_type", &self.source_type)
            .field("origin", &self.origin)
            .field("secret", &crate::utils::REDACTED)
            .finish()
    }
}

/// A connected provider bound to one workspace for one session
#[derive(Debug)]
pub struct ProviderHandle {
    pub workspace_id: String,
    pub data_source_id: Option<String>,
    pub origin: SourceOrigin,
    provider: BackendProvider,
}

impl ProviderHandle {
    pub fn provider(&self) -> &BackendProvider {
        &self.provider
    }

    pub fn source_type(&self) -> SourceType {
        self.provider.source_type()
    }
}

impl std::ops::Deref for ProviderHandle {
    type Target = BackendProvider;

    fn deref(&self) -> &Self::Target {
        &self.provider
    }
}

fn decrypt_reason(reason: &DecryptError) -> &'static str {
    match reason {
        DecryptError::Empty => "empty",
        DecryptError::NotEncrypted => "not_encrypted",
        DecryptError::Malformed(_) => "malformed",
        DecryptError::AuthenticationFailed => "authentication_failed",
        DecryptError::InvalidUtf8 => "invalid_utf8",
    }
}

/// Shared resolver; cheap to clone
#[derive(Clone)]
pub struct DataSourceResolver {
    configs: Arc<dyn DataSourceConfigStore>,
    mappings: Arc<dyn StatusMappingStore>,
    cipher: Arc<SecretCipher>,
    settings: ProviderConfig,
    metrics: MetricsRecorder,
}

impl std::fmt::Debug for DataSourceResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceResolver")
            .field("settings", &self.settings)
            .field("key_version", &self.cipher.key_version())
            .finish()
    }
}

impl DataSourceResolver {
    pub fn new(
        configs: Arc<dyn DataSourceConfigStore>,
        mappings: Arc<dyn StatusMappingStore>,
        cipher: Arc<SecretCipher>,
        settings: ProviderConfig,
    ) -> Self {
        Self { configs, mappings, cipher, settings, metrics: MetricsRecorder::new() }
    }

    pub fn settings(&self) -> &ProviderConfig {
        &self.settings
    }

    /// Start a session with empty caches
    pub fn session(&self) -> ResolverSession {
        ResolverSession {
            resolver: self.clone(),
            handles: HashMap::new(),
            normalizers: HashMap::new(),
        }
    }

    /// Pick the configuration row and decrypt its secret, without connecting
    #[instrument(skip(self))]
    pub async fn resolve_source(
        &self,
        workspace_id: &str,
        data_source_id: Option<&str>,
    ) -> Result<ResolvedSource> {
        match self.select_row(workspace_id, data_source_id).await? {
            Some(row) => {
                let secret = self.open_secret(&row).await?;
                debug!(
                    data_source_id = %row.id,
                    source_type = %row.source_type,
                    "Resolved configured data source"
                );
                Ok(ResolvedSource {
                    workspace_id: workspace_id.to_string(),
                    data_source_id: Some(row.id),
                    source_type: row.source_type,
                    origin: SourceOrigin::Configured,
                    custom_queries: row.custom_queries,
                    secret,
                })
            }
            None => self.workspace_default(workspace_id),
        }
    }

    async fn select_row(
        &self,
        workspace_id: &str,
        data_source_id: Option<&str>,
    ) -> Result<Option<DataSourceConfig>> {
        let Some(id) = data_source_id else {
            return self.configs.oldest_active(workspace_id).await;
        };

        let row = self
            .configs
            .get_by_id(id)
            .await?
            .filter(|row| row.workspace_id == workspace_id)
            .ok_or_else(|| {
                SourceplaneError::config_for(
                    format!("Data source '{}' not found in workspace", id),
                    workspace_id,
                )
            })?;

        if !row.is_active {
            return Err(SourceplaneError::config_for(
                format!("Data source '{}' is inactive", id),
                workspace_id,
            ));
        }
        Ok(Some(row))
    }

    fn workspace_default(&self, workspace_id: &str) -> Result<ResolvedSource> {
        let (Some(url), Some(source_type)) =
            (self.settings.default_source_url.as_deref(), self.settings.default_source_type())
        else {
            return Err(SourceplaneError::config_for(
                "No active data source is configured for this workspace and no default connection is set",
                workspace_id,
            ));
        };

        info!(
            workspace_id = %workspace_id,
            source_type = %source_type,
            "No data source configured; using workspace default connection"
        );
        Ok(ResolvedSource {
            workspace_id: workspace_id.to_string(),
            data_source_id: None,
            source_type,
            origin: SourceOrigin::WorkspaceDefault,
            custom_queries: HashMap::new(),
            secret: Zeroizing::new(url.to_string()),
        })
    }

    /// Decrypt a row's secret, recovering and persisting on key rotation
    async fn open_secret(&self, row: &DataSourceConfig) -> Result<Zeroizing<String>> {
        let stored = row.encrypted_secret.as_deref();
        let failure = |reason: DecryptError| {
            self.metrics.record_decrypt_failure(decrypt_reason(&reason));
            warn!(
                workspace_id = %row.workspace_id,
                data_source_id = %row.id,
                reason = %reason,
                "Stored secret could not be decrypted"
            );
            SourceplaneError::SecretDecryption {
                workspace_id: row.workspace_id.clone(),
                data_source_id: row.id.clone(),
                reason,
            }
        };

        match self.cipher.decrypt(stored) {
            Ok(plaintext) => Ok(Zeroizing::new(plaintext)),
            Err(DecryptError::NotEncrypted) => {
                let plaintext = stored.unwrap_or_default().trim();
                if !BackendProvider::is_connection_secret(row.source_type, plaintext) {
                    return Err(failure(DecryptError::NotEncrypted));
                }
                warn!(
                    workspace_id = %row.workspace_id,
                    data_source_id = %row.id,
                    "Secret is stored as legacy plaintext; run reencrypt-secrets to protect it"
                );
                Ok(Zeroizing::new(plaintext.to_string()))
            }
            Err(DecryptError::AuthenticationFailed) => {
                let recovered = self.cipher.recover(stored).map_err(failure)?;
                self.metrics.record_secret_recovered(recovered.key_index);

                if let Some(reencrypted) = recovered.reencrypted.as_deref() {
                    match self.configs.update_encrypted_secret(&row.id, reencrypted).await {
                        Ok(()) => info!(
                            workspace_id = %row.workspace_id,
                            data_source_id = %row.id,
                            key_index = recovered.key_index,
                            "Re-encrypted secret under the current key"
                        ),
                        Err(e) => warn!(
                            workspace_id = %row.workspace_id,
                            data_source_id = %row.id,
                            error = %e,
                            "Failed to persist re-encrypted secret; will retry on next resolve"
                        ),
                    }
                }
                Ok(Zeroizing::new(recovered.plaintext))
            }
            Err(reason) => Err(failure(reason)),
        }
    }

    async fn load_normalizer(&self, workspace_id: &str, source_type: SourceType) -> StatusNormalizer {
        match self.mappings.list_for_workspace(workspace_id, source_type).await {
            Ok(mappings) => StatusNormalizer::from_mappings(source_type, &mappings),
            Err(e) => {
                warn!(
                    workspace_id = %workspace_id,
                    source_type = %source_type,
                    error = %e,
                    "Failed to load status mappings; using global table only"
                );
                StatusNormalizer::global()
            }
        }
    }
}

type HandleKey = (String, Option<String>);

/// Per-session cache of connected providers and status normalizers
#[derive(Debug)]
pub struct ResolverSession {
    resolver: DataSourceResolver,
    handles: HashMap<HandleKey, Arc<ProviderHandle>>,
    normalizers: HashMap<(String, SourceType), Arc<StatusNormalizer>>,
}

impl ResolverSession {
    /// Connected provider for the workspace, cached for this session
    #[instrument(skip(self))]
    pub async fn resolve(
        &mut self,
        workspace_id: &str,
        data_source_id: Option<&str>,
    ) -> Result<Arc<ProviderHandle>> {
        let key = (workspace_id.to_string(), data_source_id.map(str::to_string));
        if let Some(handle) = self.handles.get(&key) {
            self.resolver.metrics.record_resolver_lookup(true);
            return Ok(Arc::clone(handle));
        }
        self.resolver.metrics.record_resolver_lookup(false);

        let source = self.resolver.resolve_source(workspace_id, data_source_id).await?;
        let normalizer = self.normalizer(workspace_id, source.source_type).await;

        let ctx = ProviderContext::new(workspace_id, self.resolver.settings.clone())
            .with_normalizer(normalizer)
            .with_custom_queries(source.custom_queries.clone());
        let provider = BackendProvider::build(source.source_type, source.secret(), ctx)?;

        if let Err(e) = provider.connect().await {
            provider.disconnect().await;
            return Err(match e {
                e @ SourceplaneError::BackendUnavailable { .. } => e,
                e if e.is_configuration_error() => e,
                other => SourceplaneError::backend_unavailable(
                    source.source_type,
                    workspace_id,
                    other.to_string(),
                ),
            });
        }

        let handle = Arc::new(ProviderHandle {
            workspace_id: workspace_id.to_string(),
            data_source_id: source.data_source_id.clone(),
            origin: source.origin,
            provider,
        });
        self.handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Status normalizer for (workspace, backend type), loaded once per session
    pub async fn normalizer(
        &mut self,
        workspace_id: &str,
        source_type: SourceType,
    ) -> Arc<StatusNormalizer> {
        let key = (workspace_id.to_string(), source_type);
        if let Some(normalizer) = self.normalizers.get(&key) {
            return Arc::clone(normalizer);
        }

        let normalizer = Arc::new(self.resolver.load_normalizer(workspace_id, source_type).await);
        self.normalizers.insert(key, Arc::clone(&normalizer));
        normalizer
    }

    /// Number of live handles
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Drop a cached handle after it failed, closing its connection
    pub async fn evict(&mut self, workspace_id: &str, data_source_id: Option<&str>) {
        let key = (workspace_id.to_string(), data_source_id.map(str::to_string));
        if let Some(handle) = self.handles.remove(&key) {
            handle.disconnect().await;
        }
    }

    /// End the session, disconnecting every handle
    pub async fn close(mut self) {
        for (_, handle) in self.handles.drain() {
            handle.disconnect().await;
        }
        self.normalizers.clear();
    }
}
