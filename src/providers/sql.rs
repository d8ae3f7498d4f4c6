//! SQL provider for relational backends
//!
//! One implementation serves both dialects through `sqlx::any`. Columns whose
//! types the `Any` driver cannot carry (timestamps, NUMERIC) are cast in the
//! built-in queries; custom templates must do the same.

use super::dialect::SqlDialect;
use super::guard;
use super::query::{
    self, BindValue, BoundQuery, QueryTemplate, TemplateContext, EQUIPMENT_STATUS_QUERY,
    MEASUREMENT_DATA_QUERY,
};
use super::{bounded, with_retry, ConnectionTestResult, DataProvider, ProviderContext};
use crate::domain::{EquipmentStatus, EquipmentStatusPage, Measurement, QueryFilter, Row, SourceType};
use crate::errors::{Result, SourceplaneError};
use crate::observability::MetricsRecorder;
use crate::utils::{redact_secret, sanitize_url};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row as _};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn, Instrument};
use zeroize::Zeroizing;

const POOL_MAX_CONNECTIONS: u32 = 4;

/// Provider for PostgreSQL and MySQL backends
pub struct SqlProvider {
    dialect: SqlDialect,
    url: Zeroizing<String>,
    ctx: ProviderContext,
    pool: RwLock<Option<AnyPool>>,
    metrics: MetricsRecorder,
}

impl SqlProvider {
    /// Build from a decrypted connection secret. Nothing is opened until
    /// [`DataProvider::connect`].
    pub fn new(dialect: SqlDialect, secret: &str, ctx: ProviderContext) -> Result<Self> {
        let url = dialect.connection_url(secret).map_err(|e| match e {
            SourceplaneError::Configuration { message, .. } => {
                SourceplaneError::config_for(message, ctx.workspace_id.clone())
            }
            other => other,
        })?;

        Ok(Self {
            dialect,
            url: Zeroizing::new(url),
            ctx,
            pool: RwLock::new(None),
            metrics: MetricsRecorder::new(),
        })
    }

    /// Provider over an existing pool
    #[cfg(test)]
    pub(crate) fn with_pool(dialect: SqlDialect, pool: AnyPool, ctx: ProviderContext) -> Self {
        Self {
            dialect,
            url: Zeroizing::new(String::new()),
            ctx,
            pool: RwLock::new(Some(pool)),
            metrics: MetricsRecorder::new(),
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    fn unavailable(&self, message: impl AsRef<str>) -> SourceplaneError {
        SourceplaneError::backend_unavailable(
            self.dialect.source_type(),
            self.ctx.workspace_id.clone(),
            redact_secret(message.as_ref(), &self.url),
        )
    }

    async fn pool(&self) -> Result<AnyPool> {
        if let Some(pool) = self.pool.read().await.as_ref() {
            return Ok(pool.clone());
        }
        self.connect().await?;
        self.pool
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| self.unavailable("connection pool closed during use"))
    }

    async fn fetch_rows(&self, query: &BoundQuery) -> Result<Vec<Row>> {
        let pool = self.pool().await?;

        let mut statement = sqlx::query(&query.sql);
        for bind in &query.binds {
            statement = match bind {
                BindValue::Text(value) => statement.bind(value.clone()),
                BindValue::Int(value) => statement.bind(*value),
            };
        }

        let rows = statement
            .fetch_all(&pool)
            .await
            .map_err(|e| self.unavailable(format!("query failed: {}", e)))?;

        Ok(rows.iter().map(row_to_map).collect())
    }

    /// Run one query with timeout, single retry and metrics
    async fn run(&self, operation: &'static str, query: &BoundQuery) -> Result<Vec<Row>> {
        let settings = &self.ctx.settings;
        let started = Instant::now();
        let span = crate::provider_span!(operation, self.ctx.workspace_id, self.dialect.source_type());

        let result = with_retry(settings.retry_delay(), operation, || async {
            bounded(
                settings.command_timeout(),
                self.dialect.source_type(),
                &self.ctx.workspace_id,
                operation,
                self.fetch_rows(query),
            )
            .await
        })
        .instrument(span)
        .await;

        let outcome = if result.is_ok() { "success" } else { "error" };
        self.metrics.record_provider_query(
            self.dialect.source_type(),
            operation,
            started.elapsed().as_secs_f64(),
            outcome,
        );
        result
    }

    /// Rows from a workspace template; `None` when no template is configured
    async fn run_template(
        &self,
        key: &'static str,
        filter: &QueryFilter,
        limit: u32,
    ) -> Result<Option<TemplateRows>> {
        let Some(template) = self.ctx.custom_query(key) else {
            return Ok(None);
        };

        let template = QueryTemplate::parse(template).map_err(|e| match e {
            SourceplaneError::Configuration { message, .. } => SourceplaneError::config_for(
                format!("Custom query '{}': {}", key, message),
                self.ctx.workspace_id.clone(),
            ),
            other => other,
        })?;

        let ctx = TemplateContext { filter, workspace_id: &self.ctx.workspace_id, limit };
        let bound = template.render(self.dialect, &ctx);
        let mut rows = self.run(key, &bound).await?;
        let fetched = rows.len() as u64;
        if !template.uses_limit() {
            rows.truncate(limit as usize);
        }
        Ok(Some(TemplateRows { rows, fetched }))
    }
}

/// Rows from a custom template.
///
/// `fetched` counts every row the template returned before truncation to the
/// effective limit. A template that pages itself with `:limit` can only report
/// the rows of that page.
struct TemplateRows {
    rows: Vec<Row>,
    fetched: u64,
}

impl std::fmt::Debug for SqlProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlProvider")
            .field("dialect", &self.dialect)
            .field("workspace_id", &self.ctx.workspace_id)
            .field("url", &sanitize_url(&self.url))
            .finish()
    }
}

#[async_trait]
impl DataProvider for SqlProvider {
    fn source_type(&self) -> SourceType {
        self.dialect.source_type()
    }

    #[instrument(skip(self), fields(workspace_id = %self.ctx.workspace_id, source_type = %self.dialect.source_type()))]
    async fn connect(&self) -> Result<()> {
        if self.pool.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.pool.write().await;
        if guard.is_some() {
            return Ok(());
        }

        sqlx::any::install_default_drivers();
        let timeout = self.ctx.settings.connect_timeout();
        let connecting = AnyPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(timeout)
            .connect(&self.url);

        let result = match tokio::time::timeout(timeout, connecting).await {
            Ok(Ok(pool)) => Ok(pool),
            Ok(Err(e)) => Err(self.unavailable(format!("connect failed: {}", e))),
            Err(_) => Err(self.unavailable(format!(
                "connect timed out after {}s",
                timeout.as_secs_f64()
            ))),
        };

        self.metrics.record_provider_connect(self.dialect.source_type(), result.is_ok());
        let pool = result.inspect_err(|e| warn!(error = %e, "Backend connect failed"))?;

        info!(url = %sanitize_url(&self.url), "Connected to relational backend");
        *guard = Some(pool);
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(pool) = self.pool.write().await.take() {
            pool.close().await;
            debug!(workspace_id = %self.ctx.workspace_id, "Closed relational backend pool");
        }
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        if let Err(e) = self.connect().await {
            return ConnectionTestResult::failed(e.to_string());
        }

        let check = BoundQuery { sql: "SELECT 1".to_string(), binds: Vec::new() };
        match bounded(
            self.ctx.settings.connect_timeout(),
            self.dialect.source_type(),
            &self.ctx.workspace_id,
            "test_connection",
            self.fetch_rows(&check),
        )
        .await
        {
            Ok(_) => ConnectionTestResult::ok(format!(
                "Connected to {} backend",
                self.dialect.source_type()
            )),
            Err(e) => ConnectionTestResult::failed(e.to_string()),
        }
    }

    async fn equipment_status(
        &self,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<EquipmentStatusPage> {
        let limit = self.ctx.settings.effective_limit(limit);

        let (rows, total) = match self.run_template(EQUIPMENT_STATUS_QUERY, filter, limit).await? {
            Some(TemplateRows { rows, fetched }) => (rows, fetched),
            None => {
                let queries = query::equipment_status_queries(self.dialect, filter, limit);
                let rows = self.run(EQUIPMENT_STATUS_QUERY, &queries.rows).await?;
                let total = match &queries.count {
                    Some(count) => {
                        count_from_rows(&self.run("equipment_status_count", count).await?)
                            .unwrap_or(rows.len() as u64)
                    }
                    None => rows.len() as u64,
                };
                (rows, total)
            }
        };

        let normalizer = &self.ctx.normalizer;
        let items = rows
            .into_iter()
            .map(|row| EquipmentStatus::from_row(row, |raw| normalizer.normalize(raw)))
            .collect();

        Ok(EquipmentStatusPage { items, total })
    }

    async fn measurement_data(
        &self,
        filter: &QueryFilter,
        limit: Option<u32>,
    ) -> Result<Vec<Measurement>> {
        let limit = self.ctx.settings.effective_limit(limit);

        let rows = match self.run_template(MEASUREMENT_DATA_QUERY, filter, limit).await? {
            Some(template) => template.rows,
            None => {
                let queries = query::measurement_queries(self.dialect, filter, limit);
                self.run(MEASUREMENT_DATA_QUERY, &queries.rows).await?
            }
        };

        let normalizer = &self.ctx.normalizer;
        Ok(rows
            .into_iter()
            .map(|row| Measurement::from_row(row, |raw| normalizer.normalize(raw)))
            .collect())
    }

    async fn execute_sql(&self, statement: &str) -> Result<Vec<Row>> {
        let statement = guard::check_statement(statement, &self.ctx.workspace_id).inspect_err(|e| {
            if matches!(e, SourceplaneError::Security { .. }) {
                self.metrics.record_security_rejection(self.dialect.source_type());
            }
        })?;

        let query = BoundQuery { sql: statement.to_string(), binds: Vec::new() };
        let mut rows = self.run("execute_sql", &query).await?;
        rows.truncate(self.ctx.settings.max_limit as usize);
        Ok(rows)
    }
}

/// Read `total` (or the first column) from a COUNT(*) result
fn count_from_rows(rows: &[Row]) -> Option<u64> {
    let row = rows.first()?;
    let value = row.get("total").or_else(|| row.values().next())?;
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f.max(0.0) as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Convert a driver row into a JSON map, trying integer, float, bool and text
/// decodes in turn. Undecodable values become null.
fn row_to_map(row: &AnyRow) -> Row {
    let mut map = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            v.map(Value::from).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            v.and_then(serde_json::Number::from_f64).map(Value::Number).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
            v.map(Value::Bool).unwrap_or(Value::Null)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            v.map(Value::String).unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        map.insert(column.name().to_string(), value);
    }
    map
}
