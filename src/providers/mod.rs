//! # Backend Providers
//!
//! One capability contract ([`DataProvider`]) over a closed set of backends:
//! a SQL provider parameterized by dialect (PostgreSQL, MySQL) and an HTTP API
//! provider. [`BackendProvider`] is the tagged dispatch chosen once when a
//! provider is resolved.
//!
//! Every backend call is bounded by the configured command timeout. Timeouts
//! and transport failures surface as `BackendUnavailable` after one retry.

pub mod dialect;
pub mod guard;
pub mod http;
pub mod query;
pub mod sql;

pub use dialect::SqlDialect;
pub use http::{HttpProvider, HttpSourceConfig};
pub use sql::SqlProvider;

use crate::config::ProviderConfig;
use crate::domain::{EquipmentStatusPage, Measurement, QueryFilter, Row, SourceType};
use crate::errors::{Result, SourceplaneError};
use crate::services::status_normalizer::StatusNormalizer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use zeroize::Zeroizing;

/// Outcome of a side-effect free round-trip
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    pub message: String,
}

impl ConnectionTestResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

/// Everything a provider needs besides its secret
#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub workspace_id: String,
    pub settings: ProviderConfig,
    pub normalizer: Arc<StatusNormalizer>,
    pub custom_queries: HashMap<String, String>,
}

impl ProviderContext {
    /// Context with the global status table and built-in queries
    pub fn new(workspace_id: impl Into<String>, settings: ProviderConfig) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            settings,
            normalizer: Arc::new(StatusNormalizer::global()),
            custom_queries: HashMap::new(),
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<StatusNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_custom_queries(mut self, custom_queries: HashMap<String, String>) -> Self {
        self.custom_queries = custom_queries;
        self
    }

    /// Named template, ignoring blank entries
    pub fn custom_query(&self, name: &str) -> Option<&str> {
        self.custom_queries.get(name).map(String::as_str).filter(|q| !q.trim().is_empty())
    }
}

/// Capability contract shared by every backend
#[async_trait]
pub trait DataProvider: Send + Sync {
    fn source_type(&self) -> SourceType;

    /// Establish the transport; a no-op when already connected
    async fn connect(&self) -> Result<()>;

    /// Release resources; safe to call repeatedly
    async fn disconnect(&self);

    /// Minimal round-trip. Failures are reported in the result, never raised.
    async fn test_connection(&self) -> ConnectionTestResult;

    async fn equipment_status(
        &self,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<EquipmentStatusPage>;

    async fn measurement_data(
        &self,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>>;

    /// Denylist-gated passthrough for trusted internal callers
    async fn execute_sql(&self, statement: &str) -> Result<Vec<Row>>;
}

/// Concrete provider selected from a configuration row
#[derive(Debug)]
pub enum BackendProvider {
    Sql(SqlProvider),
    Http(HttpProvider),
}

impl BackendProvider {
    /// Build the provider for `source_type` from its decrypted secret
    pub fn build(source_type: SourceType, secret: &str, ctx: ProviderContext) -> Result<Self> {
        match SqlDialect::for_source_type(source_type) {
            Some(dialect) => Ok(Self::Sql(SqlProvider::new(dialect, secret, ctx)?)),
            None => Ok(Self::Http(HttpProvider::new(secret, ctx)?)),
        }
    }

    /// Whether `secret` is usable connection material for `source_type`.
    ///
    /// Relational secrets must yield a driver URL for the dialect; HTTP secrets
    /// must be an http(s) URL or a JSON settings document. Nothing is opened.
    pub fn is_connection_secret(source_type: SourceType, secret: &str) -> bool {
        match SqlDialect::for_source_type(source_type) {
            Some(dialect) => dialect.connection_url(secret).map(Zeroizing::new).is_ok(),
            None => HttpSourceConfig::parse(secret).is_ok(),
        }
    }

    fn inner(&self) -> &dyn DataProvider {
        match self {
            Self::Sql(provider) => provider,
            Self::Http(provider) => provider,
        }
    }
}

#[async_trait]
impl DataProvider for BackendProvider {
    fn source_type(&self) -> SourceType {
        self.inner().source_type()
    }

    async fn connect(&self) -> Result<()> {
        self.inner().connect().await
    }

    async fn disconnect(&self) {
        self.inner().disconnect().await
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        self.inner().test_connection().await
    }

    async fn equipment_status(
        &self,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<EquipmentStatusPage> {
        self.inner().equipment_status(filter, limit).await
    }

    async fn measurement_data(
        &self,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>> {
        self.inner().measurement_data(filter, limit).await
    }

    async fn execute_sql(&self, statement: &str) -> Result<Vec<Row>> {
        self.inner().execute_sql(statement).await
    }
}

/// Run `call`, retrying once after `delay` when it fails with a retryable error
pub(crate) async fn with_retry<T, F, Fut>(delay: Duration, operation: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match call().await {
        Err(e) if e.is_retryable() => {
            warn!(operation = %operation, error = %e, "Backend call failed, retrying once");
            tokio::time::sleep(delay).await;
            call().await
        }
        other => other,
    }
}

/// Bound a backend call by `timeout`; expiry is a backend-unavailable failure
pub(crate) async fn bounded<T, Fut>(
    timeout: Duration,
    source_type: SourceType,
    workspace_id: &str,
    operation: &str,
    call: Fut,
) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, call).await.unwrap_or_else(|_| {
        Err(SourceplaneError::backend_unavailable(
            source_type,
            workspace_id,
            format!("{} timed out after {}s", operation, timeout.as_secs_f64()),
        ))
    })
}
