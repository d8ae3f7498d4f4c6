//! # Structured Logging
//!
//! `tracing-subscriber` setup plus span macros for provider and broadcast work.
//!
//! The filter comes from `RUST_LOG` when set, otherwise from the configured
//! log level. JSON output is selected with `SOURCEPLANE_JSON_LOGGING=true`.
//!
//! Secrets never appear as span or event fields; connection strings are passed
//! through [`crate::utils::redact_secret`] before they reach a log line.

use crate::config::ObservabilityConfig;
use crate::errors::{Result, SourceplaneError};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber
pub fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| {
            SourceplaneError::config(format!("Invalid log level '{}': {}", config.log_level, e))
        })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json_logging {
        registry
            .with(fmt::layer().json().with_current_span(true).with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| {
        SourceplaneError::internal(format!("Failed to install tracing subscriber: {}", e))
    })
}

/// Create a tracing span for one backend provider call.
///
/// ```rust,ignore
/// let span = provider_span!("equipment_status", "ws-1", SourceType::Postgres);
/// ```
#[macro_export]
macro_rules! provider_span {
    ($operation:expr, $workspace_id:expr, $source_type:expr) => {
        tracing::debug_span!(
            "provider_operation",
            operation = %$operation,
            workspace_id = %$workspace_id,
            source_type = %$source_type,
            operation_id = %uuid::Uuid::new_v4()
        )
    };
    ($operation:expr, $workspace_id:expr, $source_type:expr, $($field:tt)*) => {
        tracing::debug_span!(
            "provider_operation",
            operation = %$operation,
            workspace_id = %$workspace_id,
            source_type = %$source_type,
            operation_id = %uuid::Uuid::new_v4(),
            $($field)*
        )
    };
}

/// Create a tracing span for a broadcast to one workspace
#[macro_export]
macro_rules! broadcast_span {
    ($workspace_id:expr, $event_kind:expr) => {
        tracing::debug_span!(
            "broadcast",
            workspace_id = %$workspace_id,
            event_kind = %$event_kind
        )
    };
}

/// Log configuration at startup
pub fn log_config_info(config: &crate::config::AppConfig) {
    tracing::info!(
        database = %crate::utils::sanitize_url(&config.database.url),
        connect_timeout_s = config.providers.connect_timeout_seconds,
        command_timeout_s = config.providers.command_timeout_seconds,
        default_source = config.providers.default_source_type().map(|t| t.as_str()),
        previous_keys = config.cipher.previous_keys_base64.len(),
        key_version = %config.cipher.key_version,
        monitor_enabled = config.monitor.enabled,
        poll_interval_s = config.monitor.poll_interval_seconds,
        metrics_enabled = config.observability.enable_metrics,
        "sourceplane configuration"
    );
}

#[cfg(test)]
mod tests {
    use crate::domain::SourceType;

    #[test]
    fn test_macros_compile() {
        let _span = provider_span!("equipment_status", "ws-1", SourceType::Postgres);
        let _span = provider_span!("execute_sql", "ws-1", SourceType::MySql, limit = 10);
        let _span = broadcast_span!("ws-1", "measurement_update");
    }
}
