//! # Configuration Settings
//!
//! Defines the configuration structure for the sourceplane service.

use crate::domain::SourceType;
use crate::errors::{Result, SourceplaneError};
use crate::services::secret_cipher::SecretCipherConfig;
use crate::utils::sanitize_url;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok()).unwrap_or(default)
}

fn env_flag(name: &str, default: bool) -> bool {
    std::env::var(name).map(|s| s.eq_ignore_ascii_case("true") || s == "1").unwrap_or(default)
}

/// Main application configuration
#[derive(Debug, Clone, Validate)]
pub struct AppConfig {
    /// Configuration store database
    #[validate(nested)]
    pub database: DatabaseConfig,

    /// Backend provider timeouts, limits and the default connection
    #[validate(nested)]
    pub providers: ProviderConfig,

    /// Poll-then-broadcast monitor
    #[validate(nested)]
    pub monitor: MonitorConfig,

    /// Observability configuration
    #[validate(nested)]
    pub observability: ObservabilityConfig,

    /// Secret cipher keys
    #[validate(skip)]
    pub cipher: SecretCipherConfig,
}

impl AppConfig {
    /// Load every section from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database: DatabaseConfig::from_env(),
            providers: ProviderConfig::from_env(),
            monitor: MonitorConfig::from_env(),
            observability: ObservabilityConfig::from_env(),
            cipher: SecretCipherConfig::from_env()?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(SourceplaneError::from)?;
        self.validate_custom()
    }

    fn validate_custom(&self) -> Result<()> {
        if !self.database.url.starts_with("sqlite:") {
            return Err(SourceplaneError::validation("Database URL must start with 'sqlite:'"));
        }

        if self.providers.default_limit > self.providers.max_limit {
            return Err(SourceplaneError::validation(
                "Default row limit cannot exceed the maximum row limit",
            ));
        }

        if let Some(url) = &self.providers.default_source_url {
            self.providers.default_source_type().ok_or_else(|| {
                SourceplaneError::validation(format!(
                    "Default source URL must be a postgres:// or mysql:// URL, got '{}'",
                    sanitize_url(url)
                ))
            })?;
        }

        Ok(())
    }
}

/// Configuration store database settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[validate(length(min = 1, message = "Database URL cannot be empty"))]
    pub url: String,

    /// Maximum number of connections in the pool
    #[validate(range(min = 1, max = 100, message = "Max connections must be between 1 and 100"))]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[validate(range(min = 0, max = 50, message = "Min connections must be between 0 and 50"))]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[validate(range(
        min = 1,
        max = 60,
        message = "Connect timeout must be between 1 and 60 seconds"
    ))]
    pub connect_timeout_seconds: u64,

    /// Idle timeout in seconds (0 = no timeout)
    pub idle_timeout_seconds: u64,

    /// Create the configuration tables at startup
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://./data/sourceplane.db".to_string(),
            max_connections: 10,
            min_connections: 0,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
            auto_migrate: true,
        }
    }
}

impl DatabaseConfig {
    /// Get connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    /// Get idle timeout as Duration (None if 0)
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_seconds))
        }
    }

    /// Whether the URL points at an in-memory database
    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }

    /// Create DatabaseConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("SOURCEPLANE_DATABASE_URL").unwrap_or(defaults.url),
            max_connections: env_parse(
                "SOURCEPLANE_DATABASE_MAX_CONNECTIONS",
                defaults.max_connections,
            ),
            min_connections: env_parse(
                "SOURCEPLANE_DATABASE_MIN_CONNECTIONS",
                defaults.min_connections,
            ),
            connect_timeout_seconds: env_parse(
                "SOURCEPLANE_DATABASE_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            ),
            idle_timeout_seconds: env_parse(
                "SOURCEPLANE_DATABASE_IDLE_TIMEOUT_SECONDS",
                defaults.idle_timeout_seconds,
            ),
            auto_migrate: env_flag("SOURCEPLANE_DATABASE_AUTO_MIGRATE", defaults.auto_migrate),
        }
    }
}

/// Backend provider settings
#[derive(Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    /// Connect timeout in seconds
    #[validate(range(min = 1, max = 60, message = "Connect timeout must be between 1 and 60 seconds"))]
    pub connect_timeout_seconds: u64,

    /// Per-command timeout in seconds
    #[validate(range(
        min = 1,
        max = 600,
        message = "Command timeout must be between 1 and 600 seconds"
    ))]
    pub command_timeout_seconds: u64,

    /// Delay before the single retry of a failed backend call
    #[validate(range(max = 10000, message = "Retry delay must be at most 10000 ms"))]
    pub retry_delay_ms: u64,

    /// Row limit when the caller gives none
    #[validate(range(min = 1, message = "Default limit must be at least 1"))]
    pub default_limit: u32,

    /// Upper bound on any requested limit
    #[validate(range(min = 1, max = 100000, message = "Max limit must be between 1 and 100000"))]
    pub max_limit: u32,

    /// Relational connection used when a workspace has no configuration row
    #[serde(skip_serializing)]
    pub default_source_url: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            connect_timeout_seconds: 5,
            command_timeout_seconds: 30,
            retry_delay_ms: 250,
            default_limit: 100,
            max_limit: 1000,
            default_source_url: None,
        }
    }
}

impl ProviderConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_seconds)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Clamp a caller-supplied limit into `[1, max_limit]`
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested.unwrap_or(self.default_limit).clamp(1, self.max_limit.max(1))
    }

    /// Relational dialect of the default connection, derived from its scheme
    pub fn default_source_type(&self) -> Option<SourceType> {
        let url = self.default_source_url.as_deref()?;
        let scheme = url.split_once("://")?.0.to_ascii_lowercase();
        match scheme.as_str() {
            "postgres" | "postgresql" => Some(SourceType::Postgres),
            "mysql" | "mariadb" => Some(SourceType::MySql),
            _ => None,
        }
    }

    /// Create ProviderConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            connect_timeout_seconds: env_parse(
                "SOURCEPLANE_CONNECT_TIMEOUT_SECONDS",
                defaults.connect_timeout_seconds,
            ),
            command_timeout_seconds: env_parse(
                "SOURCEPLANE_COMMAND_TIMEOUT_SECONDS",
                defaults.command_timeout_seconds,
            ),
            retry_delay_ms: env_parse("SOURCEPLANE_RETRY_DELAY_MS", defaults.retry_delay_ms),
            default_limit: env_parse("SOURCEPLANE_DEFAULT_LIMIT", defaults.default_limit),
            max_limit: env_parse("SOURCEPLANE_MAX_LIMIT", defaults.max_limit),
            default_source_url: std::env::var("SOURCEPLANE_DEFAULT_SOURCE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("connect_timeout_seconds", &self.connect_timeout_seconds)
            .field("command_timeout_seconds", &self.command_timeout_seconds)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("default_limit", &self.default_limit)
            .field("max_limit", &self.max_limit)
            .field("default_source_url", &self.default_source_url.as_deref().map(sanitize_url))
            .finish()
    }
}

/// Poll-then-broadcast monitor settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct MonitorConfig {
    /// Run the monitor loop in `sourceplane run`
    pub enabled: bool,

    /// Seconds between poll cycles
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Poll interval must be between 1 and 3600 seconds"
    ))]
    pub poll_interval_seconds: u64,

    /// Pending events a subscriber may hold before it is pruned
    #[validate(range(
        min = 1,
        max = 10000,
        message = "Subscriber buffer must be between 1 and 10000"
    ))]
    pub subscriber_buffer: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { enabled: true, poll_interval_seconds: 5, subscriber_buffer: 64 }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Create MonitorConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_flag("SOURCEPLANE_MONITOR_ENABLED", defaults.enabled),
            poll_interval_seconds: env_parse(
                "SOURCEPLANE_MONITOR_POLL_INTERVAL_SECONDS",
                defaults.poll_interval_seconds,
            ),
            subscriber_buffer: env_parse(
                "SOURCEPLANE_SUBSCRIBER_BUFFER",
                defaults.subscriber_buffer,
            ),
        }
    }
}

/// Observability configuration for logging and metrics
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ObservabilityConfig {
    /// Enable metrics collection
    pub enable_metrics: bool,

    /// Metrics server port (0 = disabled)
    #[validate(range(max = 65535, message = "Metrics port must be <= 65535"))]
    pub metrics_port: u16,

    /// Service name attached to log lines
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: String,

    /// Log level (trace, debug, info, warn, error)
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub log_level: String,

    /// Enable JSON structured logging
    pub json_logging: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            metrics_port: 9090,
            service_name: "sourceplane".to_string(),
            log_level: "info".to_string(),
            json_logging: false,
        }
    }
}

impl ObservabilityConfig {
    /// Get metrics bind address (None if disabled)
    pub fn metrics_bind_address(&self) -> Option<String> {
        if self.metrics_port == 0 {
            None
        } else {
            Some(format!("0.0.0.0:{}", self.metrics_port))
        }
    }

    /// Create ObservabilityConfig from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enable_metrics: env_flag("SOURCEPLANE_ENABLE_METRICS", defaults.enable_metrics),
            metrics_port: env_parse("SOURCEPLANE_METRICS_PORT", defaults.metrics_port),
            service_name: std::env::var("SOURCEPLANE_SERVICE_NAME")
                .unwrap_or(defaults.service_name),
            log_level: std::env::var("SOURCEPLANE_LOG_LEVEL").unwrap_or(defaults.log_level),
            json_logging: env_flag("SOURCEPLANE_JSON_LOGGING", defaults.json_logging),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> AppConfig {
        AppConfig {
            database: DatabaseConfig::default(),
            providers: ProviderConfig::default(),
            monitor: MonitorConfig::default(),
            observability: ObservabilityConfig::default(),
            cipher: SecretCipherConfig::for_testing(),
        }
    }

    #[test]
    fn test_default_config_validation() {
        assert!(test_config().validate().is_ok());
    }

    #[test]
    fn test_database_config_timeouts() {
        let config = DatabaseConfig {
            connect_timeout_seconds: 15,
            idle_timeout_seconds: 300,
            ..Default::default()
        };
        assert_eq!(config.connect_timeout(), Duration::from_secs(15));
        assert_eq!(config.idle_timeout(), Some(Duration::from_secs(300)));

        let config_no_idle = DatabaseConfig { idle_timeout_seconds: 0, ..Default::default() };
        assert_eq!(config_no_idle.idle_timeout(), None);
    }

    #[test]
    fn test_non_sqlite_store_rejected() {
        let mut config = test_config();
        config.database.url = "postgresql://localhost/config".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_effective_limit_clamps() {
        let config = ProviderConfig::default();
        assert_eq!(config.effective_limit(None), 100);
        assert_eq!(config.effective_limit(Some(0)), 1);
        assert_eq!(config.effective_limit(Some(50)), 50);
        assert_eq!(config.effective_limit(Some(1_000_000)), 1000);
    }

    #[test]
    fn test_default_source_type_from_scheme() {
        let mut config = ProviderConfig::default();
        assert_eq!(config.default_source_type(), None);

        config.default_source_url = Some("postgres://u:p@db/plant".to_string());
        assert_eq!(config.default_source_type(), Some(SourceType::Postgres));

        config.default_source_url = Some("mariadb://u:p@db/plant".to_string());
        assert_eq!(config.default_source_type(), Some(SourceType::MySql));

        config.default_source_url = Some("https://api.example.com".to_string());
        assert_eq!(config.default_source_type(), None);
    }

    #[test]
    fn test_invalid_default_source_rejected() {
        let mut config = test_config();
        config.providers.default_source_url = Some("ftp://files".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_limit_above_max_rejected() {
        let mut config = test_config();
        config.providers.default_limit = 5000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_debug_hides_credentials() {
        let config = ProviderConfig {
            default_source_url: Some("mysql://svc:hunter2@db/plant".to_string()),
            ..Default::default()
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_monitor_and_metrics_defaults() {
        assert_eq!(MonitorConfig::default().poll_interval(), Duration::from_secs(5));
        assert_eq!(
            ObservabilityConfig::default().metrics_bind_address(),
            Some("0.0.0.0:9090".to_string())
        );
        let disabled = ObservabilityConfig { metrics_port: 0, ..Default::default() };
        assert_eq!(disabled.metrics_bind_address(), None);
    }
}
