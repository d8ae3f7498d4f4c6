//! # Metrics Collection
//!
//! Counters and histograms for provider calls, secret handling and fan-out.
//! Without an installed exporter every call is a no-op, so components hold a
//! `MetricsRecorder` unconditionally.

use crate::config::ObservabilityConfig;
use crate::domain::SourceType;
use crate::errors::{Result, SourceplaneError};
use ::tracing::{info, warn};
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

/// Metrics recorder that tracks data source activity
#[derive(Debug, Clone, Default)]
pub struct MetricsRecorder;

impl MetricsRecorder {
    /// Create a new metrics recorder instance
    pub fn new() -> Self {
        Self
    }

    /// Record a provider read or statement with its outcome
    pub fn record_provider_query(
        &self,
        source_type: SourceType,
        operation: &str,
        duration: f64,
        outcome: &str,
    ) {
        let labels = [
            ("source_type", source_type.as_str().to_string()),
            ("operation", operation.to_string()),
            ("outcome", outcome.to_string()),
        ];
        counter!("provider_queries_total", &labels).increment(1);

        let duration_labels =
            [("source_type", source_type.as_str().to_string()), ("operation", operation.to_string())];
        histogram!("provider_query_duration_seconds", &duration_labels).record(duration);
    }

    /// Record a provider connect attempt
    pub fn record_provider_connect(&self, source_type: SourceType, success: bool) {
        let status = if success { "success" } else { "error" };
        let labels = [("source_type", source_type.as_str().to_string()), ("status", status.to_string())];
        counter!("provider_connects_total", &labels).increment(1);
    }

    /// Record a secret that could not be decrypted
    pub fn record_decrypt_failure(&self, reason: &str) {
        counter!("secret_decrypt_failures_total", "reason" => reason.to_string()).increment(1);
    }

    /// Record a secret recovered with a previous key
    pub fn record_secret_recovered(&self, key_index: usize) {
        counter!("secret_key_recoveries_total", "key_index" => key_index.to_string()).increment(1);
    }

    /// Record a statement rejected by the denylist
    pub fn record_security_rejection(&self, source_type: SourceType) {
        counter!("sql_statements_rejected_total", "source_type" => source_type.as_str())
            .increment(1);
    }

    /// Record a resolver cache lookup
    pub fn record_resolver_lookup(&self, cache_hit: bool) {
        let result = if cache_hit { "hit" } else { "miss" };
        counter!("resolver_lookups_total", "result" => result).increment(1);
    }

    /// Record one broadcast and its delivery outcome
    pub fn record_broadcast(&self, event_kind: &str, delivered: usize, pruned: usize) {
        let labels = [("event_kind", event_kind.to_string())];
        counter!("broadcast_events_total", &labels).increment(1);
        counter!("broadcast_deliveries_total", &labels).increment(delivered as u64);
        counter!("broadcast_pruned_subscribers_total", &labels).increment(pruned as u64);
    }

    /// Update the live subscriber gauge
    pub fn update_subscribers(&self, count: usize) {
        gauge!("broadcast_subscribers_active").set(count as f64);
    }

    /// Record one monitor poll cycle
    pub fn record_monitor_cycle(&self, duration: f64, workspaces: usize, failures: usize) {
        histogram!("monitor_cycle_duration_seconds").record(duration);
        counter!("monitor_workspace_polls_total").increment(workspaces as u64);
        counter!("monitor_workspace_failures_total").increment(failures as u64);
    }

    /// Describe every metric for the exporter
    pub fn register_metrics(&self) {
        describe_counter!(
            "provider_queries_total",
            Unit::Count,
            "Backend provider calls by source type, operation and outcome"
        );
        describe_histogram!(
            "provider_query_duration_seconds",
            Unit::Seconds,
            "Backend provider call latency"
        );
        describe_counter!("provider_connects_total", Unit::Count, "Backend connect attempts");
        describe_counter!(
            "secret_decrypt_failures_total",
            Unit::Count,
            "Stored secrets that could not be decrypted"
        );
        describe_counter!(
            "secret_key_recoveries_total",
            Unit::Count,
            "Secrets recovered with a previous key and re-encrypted"
        );
        describe_counter!(
            "sql_statements_rejected_total",
            Unit::Count,
            "Free-form statements rejected by the denylist"
        );
        describe_counter!("resolver_lookups_total", Unit::Count, "Provider resolution cache lookups");
        describe_counter!("broadcast_events_total", Unit::Count, "Events broadcast to workspaces");
        describe_counter!(
            "broadcast_deliveries_total",
            Unit::Count,
            "Events delivered to individual subscribers"
        );
        describe_counter!(
            "broadcast_pruned_subscribers_total",
            Unit::Count,
            "Subscribers removed after a failed delivery"
        );
        describe_gauge!("broadcast_subscribers_active", Unit::Count, "Live subscribers");
        describe_histogram!(
            "monitor_cycle_duration_seconds",
            Unit::Seconds,
            "Duration of one poll-then-broadcast cycle"
        );
        describe_counter!("monitor_workspace_polls_total", Unit::Count, "Workspaces polled");
        describe_counter!(
            "monitor_workspace_failures_total",
            Unit::Count,
            "Workspace polls that failed"
        );
    }
}

/// Initialize metrics collection and, when built with the `prometheus`
/// feature, the Prometheus exporter
pub async fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let metrics_addr = match config.metrics_bind_address() {
        Some(addr) => addr,
        None => {
            warn!("Metrics disabled: no bind address configured");
            return Ok(());
        }
    };

    let socket_addr: std::net::SocketAddr = metrics_addr.parse().map_err(|e| {
        SourceplaneError::config(format!("Invalid metrics bind address '{}': {}", metrics_addr, e))
    })?;

    install_exporter(config, socket_addr)?;
    MetricsRecorder::new().register_metrics();

    info!(
        metrics_addr = %metrics_addr,
        service_name = %config.service_name,
        "Metrics collection initialized"
    );

    Ok(())
}

#[cfg(feature = "prometheus")]
fn install_exporter(config: &ObservabilityConfig, socket_addr: std::net::SocketAddr) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(socket_addr)
        .add_global_label("service", &config.service_name)
        .install()
        .map_err(|e| {
            SourceplaneError::config(format!("Failed to initialize metrics exporter: {}", e))
        })
}

#[cfg(not(feature = "prometheus"))]
fn install_exporter(_config: &ObservabilityConfig, socket_addr: std::net::SocketAddr) -> Result<()> {
    warn!(
        metrics_addr = %socket_addr,
        "Built without the 'prometheus' feature; metrics are recorded but not exported"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording_without_exporter() {
        let recorder = MetricsRecorder::new();
        recorder.record_provider_query(SourceType::Postgres, "equipment_status", 0.12, "success");
        recorder.record_provider_connect(SourceType::HttpApi, false);
        recorder.record_decrypt_failure("authentication_failed");
        recorder.record_secret_recovered(1);
        recorder.record_security_rejection(SourceType::MySql);
        recorder.record_resolver_lookup(true);
        recorder.record_broadcast("measurement_update", 3, 1);
        recorder.update_subscribers(2);
        recorder.record_monitor_cycle(0.5, 4, 0);
        recorder.register_metrics();
    }

    #[tokio::test]
    async fn test_init_metrics_disabled() {
        let config = ObservabilityConfig { enable_metrics: false, ..Default::default() };
        assert!(init_metrics(&config).await.is_ok());
    }

    #[tokio::test]
    async fn test_init_metrics_no_port() {
        let config =
            ObservabilityConfig { enable_metrics: true, metrics_port: 0, ..Default::default() };
        assert!(init_metrics(&config).await.is_ok());
    }
}
