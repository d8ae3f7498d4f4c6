//! Poll-then-broadcast loop
//!
//! Each cycle polls every workspace that currently has subscribers, using a
//! fresh resolver session per workspace, and pushes status, measurement and
//! alarm events through the hub. A failing workspace is logged and skipped.

use crate::broadcast::{BroadcastHub, HubEvent};
use crate::config::MonitorConfig;
use crate::domain::QueryFilter;
use crate::errors::{Result, SourceplaneError};
use crate::observability::MetricsRecorder;
use crate::providers::DataProvider;
use crate::services::resolver::DataSourceResolver;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one poll cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub workspaces: usize,
    pub failures: usize,
    pub events: usize,
}

/// Background poller feeding the broadcast hub
#[derive(Debug, Clone)]
pub struct StatusMonitor {
    resolver: DataSourceResolver,
    hub: Arc<BroadcastHub>,
    interval: Duration,
    metrics: MetricsRecorder,
}

impl StatusMonitor {
    pub fn new(resolver: DataSourceResolver, hub: Arc<BroadcastHub>, config: &MonitorConfig) -> Self {
        Self {
            resolver,
            hub,
            interval: config.poll_interval().max(Duration::from_millis(100)),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Poll every subscribed workspace once
    pub async fn run_once(&self) -> CycleReport {
        let started = Instant::now();
        let workspaces = self.hub.active_workspaces();

        let outcomes = join_all(workspaces.iter().map(|ws| async move {
            let outcome = self.poll_workspace(ws).await;
            if let Err(e) = &outcome {
                warn!(workspace_id = %ws, error = %e, "Workspace poll failed");
            }
            outcome
        }))
        .await;

        let mut report = CycleReport { workspaces: workspaces.len(), ..Default::default() };
        for outcome in outcomes {
            match outcome {
                Ok(events) => report.events += events,
                Err(_) => report.failures += 1,
            }
        }

        self.metrics.record_monitor_cycle(
            started.elapsed().as_secs_f64(),
            report.workspaces,
            report.failures,
        );
        debug!(
            workspaces = report.workspaces,
            failures = report.failures,
            events = report.events,
            "Monitor cycle complete"
        );
        report
    }

    async fn poll_workspace(&self, workspace_id: &str) -> Result<usize> {
        let mut session = self.resolver.session();

        let outcome = async {
            let handle = session.resolve(workspace_id, None).await?;
            let filter = QueryFilter::default();

            let page = handle.equipment_status(&filter, None).await?;
            let measurements = handle.measurement_data(&filter, None).await?;

            let mut events = vec![
                HubEvent::equipment_status_update(workspace_id, &page),
                HubEvent::measurement_update(workspace_id, &measurements),
            ];
            events.extend(
                measurements
                    .iter()
                    .filter(|m| m.is_spec_violation())
                    .map(|m| HubEvent::spec_violation_alarm(workspace_id, m)),
            );

            let count = events.len();
            for event in events {
                self.hub.broadcast(workspace_id, event);
            }
            Ok::<_, SourceplaneError>(count)
        }
        .await;

        session.close().await;
        outcome
    }

    /// Poll on the configured interval until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "Status monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let cycle = self.run_once();
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = cycle => {}
                    }
                }
            }
        }

        info!("Status monitor stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
