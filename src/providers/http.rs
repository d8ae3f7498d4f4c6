//! HTTP API provider
//!
//! Reads are authenticated GET requests against endpoint templates. The secret
//! is either a bare base URL or a JSON document:
//!
//! ```json
//! {
//!   "base_url": "https://mes.example.com/api",
//!   "bearer_token": "...",
//!   "headers": {"X-Api-Key": "..."},
//!   "endpoints": {"equipment_status": "/plants/{workspace_id}/equipment"},
//!   "timeout_seconds": 10
//! }
//! ```
//!
//! A non-2xx response yields an empty result and a warning. Transport failures
//! and timeouts are `BackendUnavailable`.

use super::guard;
use super::query::{EQUIPMENT_STATUS_QUERY, MEASUREMENT_DATA_QUERY};
use super::{bounded, with_retry, ConnectionTestResult, DataProvider, ProviderContext};
use crate::domain::{EquipmentStatus, EquipmentStatusPage, Measurement, QueryFilter, Row, SourceType};
use crate::errors::{Result, SourceplaneError};
use crate::observability::MetricsRecorder;
use crate::utils::{redact_secret, sanitize_url};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn, Instrument};

const ITEM_KEYS: &[&str] = &["items", "data", "results"];
const TOTAL_KEYS: &[&str] = &["total", "count"];

fn default_equipment_endpoint() -> String {
    "/equipment/status".to_string()
}

fn default_measurement_endpoint() -> String {
    "/measurements".to_string()
}

/// Endpoint path templates relative to the base URL
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HttpEndpoints {
    #[serde(default = "default_equipment_endpoint")]
    pub equipment_status: String,
    #[serde(default = "default_measurement_endpoint")]
    pub measurement_data: String,
}

impl Default for HttpEndpoints {
    fn default() -> Self {
        Self {
            equipment_status: default_equipment_endpoint(),
            measurement_data: default_measurement_endpoint(),
        }
    }
}

/// Decrypted connection settings for an HTTP data source
#[derive(Clone, Deserialize)]
pub struct HttpSourceConfig {
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default)]
    pub endpoints: HttpEndpoints,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl HttpSourceConfig {
    /// Parse a secret that is either JSON or a bare `http(s)://` URL
    pub fn parse(secret: &str) -> Result<Self> {
        let secret = secret.trim();
        let mut config = if secret.starts_with('{') {
            serde_json::from_str::<Self>(secret).map_err(|e| {
                SourceplaneError::config(format!("Invalid HTTP data source settings: {}", e))
            })?
        } else {
            Self {
                base_url: secret.to_string(),
                headers: HashMap::new(),
                bearer_token: None,
                endpoints: HttpEndpoints::default(),
                timeout_seconds: None,
            }
        };

        let parsed = url::Url::parse(&config.base_url).map_err(|e| {
            SourceplaneError::config(format!(
                "Invalid HTTP base URL '{}': {}",
                sanitize_url(&config.base_url),
                e
            ))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SourceplaneError::config(format!(
                "HTTP data source requires an http or https URL, got '{}'",
                parsed.scheme()
            )));
        }

        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Default headers including bearer authentication, marked sensitive
    fn header_map(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                SourceplaneError::config(format!("Invalid HTTP header name '{}'", name))
            })?;
            let mut header_value = HeaderValue::from_str(value).map_err(|_| {
                SourceplaneError::config(format!("Invalid value for HTTP header '{}'", name))
            })?;
            header_value.set_sensitive(true);
            headers.insert(header_name, header_value);
        }

        if let Some(token) = self.bearer_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| SourceplaneError::config("Invalid bearer token"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(headers)
    }

    fn credential_values(&self) -> impl Iterator<Item = &str> {
        self.headers.values().map(String::as_str).chain(self.bearer_token.as_deref())
    }
}

impl std::fmt::Debug for HttpSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpSourceConfig")
            .field("base_url", &sanitize_url(&self.base_url))
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| crate::utils::REDACTED))
            .field("endpoints", &self.endpoints)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

/// Provider for REST-style plant systems
pub struct HttpProvider {
    config: HttpSourceConfig,
    headers: HeaderMap,
    ctx: ProviderContext,
    client: RwLock<Option<Client>>,
    metrics: MetricsRecorder,
}

impl HttpProvider {
    /// Build from a decrypted secret. The client is created on connect.
    pub fn new(secret: &str, ctx: ProviderContext) -> Result<Self> {
        let workspace_config_error = |e: SourceplaneError| match e {
            SourceplaneError::Configuration { message, .. } => {
                SourceplaneError::config_for(message, ctx.workspace_id.clone())
            }
            other => other,
        };
        let config = HttpSourceConfig::parse(secret).map_err(workspace_config_error)?;
        let headers = config.header_map().map_err(workspace_config_error)?;

        Ok(Self {
            config,
            headers,
            ctx,
            client: RwLock::new(None),
            metrics: MetricsRecorder::new(),
        })
    }

    pub fn config(&self) -> &HttpSourceConfig {
        &self.config
    }

    fn request_timeout(&self) -> Duration {
        self.config
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.ctx.settings.command_timeout())
    }

    fn redact(&self, message: &str) -> String {
        self.config
            .credential_values()
            .fold(message.to_string(), |acc, secret| redact_secret(&acc, secret))
    }

    fn unavailable(&self, message: impl AsRef<str>) -> SourceplaneError {
        SourceplaneError::backend_unavailable(
            SourceType::HttpApi,
            self.ctx.workspace_id.clone(),
            self.redact(message.as_ref()),
        )
    }

    async fn client(&self) -> Result<Client> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(client.clone());
        }
        self.connect().await?;
        self.client
            .read()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| self.unavailable("HTTP client closed during use"))
    }

    /// Absolute URL for a read, honouring a workspace override of the path.
    ///
    /// The result must share the origin of `base_url`; credentials are never
    /// sent to another host.
    fn endpoint_url(&self, key: &str) -> Result<String> {
        let template = self.ctx.custom_query(key).unwrap_or(match key {
            EQUIPMENT_STATUS_QUERY => self.config.endpoints.equipment_status.as_str(),
            _ => self.config.endpoints.measurement_data.as_str(),
        });

        let workspace = url::form_urlencoded::byte_serialize(self.ctx.workspace_id.as_bytes())
            .collect::<String>()
            .replace('+', "%20");
        let path = template.trim().replace("{workspace_id}", &workspace);

        let joined = if path.starts_with("http://") || path.starts_with("https://") {
            path
        } else if path.starts_with('/') {
            format!("{}{}", self.config.base_url, path)
        } else {
            format!("{}/{}", self.config.base_url, path)
        };

        let outside_base = || {
            SourceplaneError::config_for(
                format!("Endpoint for '{}' must stay on the configured base URL host", key),
                self.ctx.workspace_id.clone(),
            )
        };
        let base = url::Url::parse(&self.config.base_url).map_err(|_| outside_base())?;
        let target = url::Url::parse(&joined).map_err(|_| outside_base())?;
        if target.origin() != base.origin() {
            warn!(
                workspace_id = %self.ctx.workspace_id,
                endpoint = %key,
                "Rejected endpoint override pointing at another origin"
            );
            return Err(outside_base());
        }
        Ok(joined)
    }

    async fn send(&self, url: &str, params: &[(&str, String)]) -> Result<Option<Value>> {
        let client = self.client().await?;
        let response = client
            .get(url)
            .query(params)
            .send()
            .await
            .map_err(|e| self.unavailable(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                workspace_id = %self.ctx.workspace_id,
                status = status.as_u16(),
                url = %sanitize_url(url),
                "HTTP data source returned non-success status; returning empty result"
            );
            return Ok(None);
        }

        match response.json::<Value>().await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.is_timeout() => Err(self.unavailable("response body timed out")),
            Err(e) => {
                warn!(
                    workspace_id = %self.ctx.workspace_id,
                    error = %self.redact(&e.without_url().to_string()),
                    "HTTP data source returned an unreadable body; returning empty result"
                );
                Ok(None)
            }
        }
    }

    /// GET one read endpoint with filter and limit as query parameters
    async fn fetch(
        &self,
        operation: &'static str,
        filter: &QueryFilter,
        limit: u32,
    ) -> Result<(Vec<Row>, Option<u64>)> {
        let url = self.endpoint_url(operation)?;
        let mut params: Vec<(&str, String)> = filter
            .named_values()
            .into_iter()
            .filter_map(|(name, value)| value.map(|v| (name, v.to_string())))
            .collect();
        params.push(("limit", limit.to_string()));

        let started = Instant::now();
        let span = crate::provider_span!(operation, self.ctx.workspace_id, SourceType::HttpApi);
        let result = with_retry(self.ctx.settings.retry_delay(), operation, || async {
            bounded(
                self.request_timeout(),
                SourceType::HttpApi,
                &self.ctx.workspace_id,
                operation,
                self.send(&url, &params),
            )
            .await
        })
        .instrument(span)
        .await;

        let outcome = match &result {
            Ok(Some(_)) => "success",
            Ok(None) => "empty",
            Err(_) => "error",
        };
        self.metrics.record_provider_query(
            SourceType::HttpApi,
            operation,
            started.elapsed().as_secs_f64(),
            outcome,
        );

        Ok(result?.map(extract_rows).unwrap_or_default())
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpProvider")
            .field("workspace_id", &self.ctx.workspace_id)
            .field("config", &self.config)
            .finish()
    }
}

#[async_trait]
impl DataProvider for HttpProvider {
    fn source_type(&self) -> SourceType {
        SourceType::HttpApi
    }

    #[instrument(skip(self), fields(workspace_id = %self.ctx.workspace_id))]
    async fn connect(&self) -> Result<()> {
        if self.client.read().await.is_some() {
            return Ok(());
        }

        let mut guard = self.client.write().await;
        if guard.is_some() {
            return Ok(());
        }

        let client = Client::builder()
            .default_headers(self.headers.clone())
            .connect_timeout(self.ctx.settings.connect_timeout())
            .timeout(self.request_timeout())
            .build()
            .map_err(|e| {
                SourceplaneError::internal(format!("Failed to build HTTP client: {}", e))
            });
        self.metrics.record_provider_connect(SourceType::HttpApi, client.is_ok());
        let client = client?;

        debug!(base_url = %sanitize_url(&self.config.base_url), "HTTP client ready");
        *guard = Some(client);
        Ok(())
    }

    async fn disconnect(&self) {
        self.client.write().await.take();
    }

    async fn test_connection(&self) -> ConnectionTestResult {
        let client = match self.client().await {
            Ok(client) => client,
            Err(e) => return ConnectionTestResult::failed(e.to_string()),
        };

        let check = async {
            client
                .get(&self.config.base_url)
                .send()
                .await
                .map_err(|e| self.unavailable(format!("request failed: {}", e.without_url())))
        };

        match bounded(
            self.ctx.settings.connect_timeout(),
            SourceType::HttpApi,
            &self.ctx.workspace_id,
            "test_connection",
            check,
        )
        .await
        {
            Ok(response)
                if matches!(response.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) =>
            {
                ConnectionTestResult::failed(format!(
                    "HTTP API rejected the configured credentials ({})",
                    response.status()
                ))
            }
            Ok(response) if !response.status().is_server_error() => {
                ConnectionTestResult::ok(format!("HTTP API reachable ({})", response.status()))
            }
            Ok(response) => ConnectionTestResult::failed(format!(
                "HTTP API returned {}",
                response.status()
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
        let (mut rows, total) = self.fetch(EQUIPMENT_STATUS_QUERY, filter, limit).await?;
        let total = total.unwrap_or(rows.len() as u64);
        rows.truncate(limit as usize);

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
        let (mut rows, _) = self.fetch(MEASUREMENT_DATA_QUERY, filter, limit).await?;
        rows.truncate(limit as usize);

        let normalizer = &self.ctx.normalizer;
        Ok(rows
            .into_iter()
            .map(|row| Measurement::from_row(row, |raw| normalizer.normalize(raw)))
            .collect())
    }

    async fn execute_sql(&self, statement: &str) -> Result<Vec<Row>> {
        guard::check_statement(statement, &self.ctx.workspace_id).inspect_err(|e| {
            if matches!(e, SourceplaneError::Security { .. }) {
                self.metrics.record_security_rejection(SourceType::HttpApi);
            }
        })?;

        Err(SourceplaneError::config_for(
            "HTTP API data sources do not support free-form SQL",
            self.ctx.workspace_id.clone(),
        ))
    }
}

/// Rows from a JSON array, or from the first array under `items`/`data`/`results`
fn extract_rows(body: Value) -> (Vec<Row>, Option<u64>) {
    let (items, total) = match body {
        Value::Array(items) => (items, None),
        Value::Object(mut object) => {
            let total = TOTAL_KEYS.iter().find_map(|k| object.get(*k).and_then(Value::as_u64));
            let items = ITEM_KEYS
                .iter()
                .find_map(|k| match object.remove(*k) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
                .unwrap_or_default();
            (items, total)
        }
        _ => (Vec::new(), None),
    };

    let rows = items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(row) => Some(row),
            _ => None,
        })
        .collect();
    (rows, total)
}
