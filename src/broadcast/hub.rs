//! Subscriber registry with per-workspace fan-out
//!
//! Workspaces map to their subscriber sets in a sharded map, so fan-out to one
//! workspace never waits on subscription changes in another. A broadcast
//! snapshots the senders before delivering, and any subscriber whose channel
//! is full or closed is removed.

use super::events::HubEvent;
use crate::observability::MetricsRecorder;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn, Instrument};

/// Default per-subscriber channel capacity
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Identifier handed to a subscriber on registration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriberId(String);

impl SubscriberId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an event could not be handed to a subscriber. Only drives pruning.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
enum DeliveryError {
    #[error("subscriber channel full")]
    Full,
    #[error("subscriber disconnected")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for DeliveryError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::Full,
            mpsc::error::TrySendError::Closed(_) => Self::Closed,
        }
    }
}

/// Receiving end of a subscription
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub workspace_id: String,
    receiver: mpsc::Receiver<HubEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued
    pub fn try_recv(&mut self) -> Option<HubEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<HubEvent> {
        ReceiverStream::new(self.receiver)
    }
}

/// Delivery outcome of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub pruned: usize,
}

/// Concurrency-safe registry of live subscribers keyed by workspace
#[derive(Debug)]
pub struct BroadcastHub {
    workspaces: DashMap<String, HashMap<SubscriberId, mpsc::Sender<HubEvent>>>,
    /// Subscriber -> workspace, for unsubscribe without a workspace id
    index: DashMap<SubscriberId, String>,
    id_counter: AtomicU64,
    buffer: usize,
    metrics: MetricsRecorder,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl BroadcastHub {
    /// Hub whose subscriber channels hold `buffer` undelivered events
    pub fn new(buffer: usize) -> Self {
        Self {
            workspaces: DashMap::new(),
            index: DashMap::new(),
            id_counter: AtomicU64::new(0),
            buffer: buffer.max(1),
            metrics: MetricsRecorder::new(),
        }
    }

    /// Register a subscriber and queue its connection acknowledgement
    pub fn subscribe(&self, workspace_id: &str) -> Subscription {
        let id = SubscriberId(format!(
            "sub-{}",
            self.id_counter.fetch_add(1, Ordering::Relaxed)
        ));
        let (sender, receiver) = mpsc::channel(self.buffer);

        // The channel is empty and has capacity, so the ack cannot fail
        let _ = sender.try_send(HubEvent::connection_ack(workspace_id, id.as_str()));

        self.workspaces
            .entry(workspace_id.to_string())
            .or_default()
            .insert(id.clone(), sender);
        self.index.insert(id.clone(), workspace_id.to_string());
        self.metrics.update_subscribers(self.index.len());

        debug!(subscriber_id = %id, workspace_id = %workspace_id, "Registered subscriber");
        Subscription { id, workspace_id: workspace_id.to_string(), receiver }
    }

    /// Remove a subscriber from whatever workspace it belongs to.
    ///
    /// Returns whether it was registered; repeated calls are no-ops.
    pub fn unsubscribe(&self, id: &SubscriberId) -> bool {
        let Some((_, workspace_id)) = self.index.remove(id) else {
            return false;
        };
        self.detach(&workspace_id, id);
        self.metrics.update_subscribers(self.index.len());
        debug!(subscriber_id = %id, workspace_id = %workspace_id, "Unregistered subscriber");
        true
    }

    /// Send `event` to every current subscriber of `workspace_id`
    pub fn broadcast(&self, workspace_id: &str, event: HubEvent) -> BroadcastReport {
        let span = crate::broadcast_span!(workspace_id, event.kind);
        let _entered = span.enter();

        let snapshot: Vec<(SubscriberId, mpsc::Sender<HubEvent>)> = match self.workspaces.get(workspace_id) {
            Some(subscribers) => {
                subscribers.iter().map(|(id, tx)| (id.clone(), tx.clone())).collect()
            }
            None => Vec::new(),
        };

        let mut report = BroadcastReport::default();
        for (id, sender) in snapshot {
            match sender.try_send(event.clone()).map_err(DeliveryError::from) {
                Ok(()) => report.delivered += 1,
                Err(reason) => {
                    warn!(subscriber_id = %id, reason = %reason, "Pruning subscriber after failed delivery");
                    if self.index.remove(&id).is_some() {
                        self.detach(workspace_id, &id);
                    }
                    report.pruned += 1;
                }
            }
        }

        if report.pruned > 0 {
            self.metrics.update_subscribers(self.index.len());
        }
        self.metrics.record_broadcast(event.kind.as_str(), report.delivered, report.pruned);
        debug!(delivered = report.delivered, pruned = report.pruned, "Broadcast complete");
        report
    }

    /// Broadcast on a spawned task, for callers that must not wait
    pub fn broadcast_detached(self: &std::sync::Arc<Self>, workspace_id: String, event: HubEvent) {
        let hub = std::sync::Arc::clone(self);
        let span = crate::broadcast_span!(workspace_id, event.kind);
        tokio::spawn(
            async move {
                hub.broadcast(&workspace_id, event);
            }
            .instrument(span),
        );
    }

    /// Workspaces with at least one subscriber
    pub fn active_workspaces(&self) -> Vec<String> {
        self.workspaces
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn subscriber_count(&self, workspace_id: &str) -> usize {
        self.workspaces.get(workspace_id).map(|s| s.len()).unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        self.index.len()
    }

    /// Drop one subscriber from its workspace set, removing the set when empty
    fn detach(&self, workspace_id: &str, id: &SubscriberId) {
        if let Some(mut subscribers) = self.workspaces.get_mut(workspace_id) {
            subscribers.remove(id);
        }
        self.workspaces.remove_if(workspace_id, |_, subscribers| subscribers.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::super::events::EventKind;
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn event(workspace_id: &str) -> HubEvent {
        HubEvent::new(EventKind::MeasurementUpdate, workspace_id, json!({"items": []}))
    }

    #[tokio::test]
    async fn test_subscribe_sends_ack() {
        let hub = BroadcastHub::default();
        let mut sub = hub.subscribe("ws-1");

        let ack = sub.recv().await.unwrap();
        assert_eq!(ack.kind, EventKind::ConnectionAck);
        assert_eq!(ack.payload["subscriber_id"], sub.id.as_str());
        assert_eq!(hub.subscriber_count("ws-1"), 1);
    }

    #[tokio::test]
    async fn test_workspace_isolation() {
        let hub = BroadcastHub::default();
        let mut a = hub.subscribe("ws-a");
        let mut b = hub.subscribe("ws-b");
        a.recv().await.unwrap();
        b.recv().await.unwrap();

        let report = hub.broadcast("ws-b", event("ws-b"));
        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 0 });

        assert!(a.try_recv().is_none());
        assert_eq!(b.try_recv().unwrap().kind, EventKind::MeasurementUpdate);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let hub = BroadcastHub::default();
        let live = hub.subscribe("ws-1");
        let dead = hub.subscribe("ws-1");
        drop(dead);

        let report = hub.broadcast("ws-1", event("ws-1"));
        assert_eq!(report, BroadcastReport { delivered: 1, pruned: 1 });
        assert_eq!(hub.subscriber_count("ws-1"), 1);
        assert_eq!(hub.total_subscribers(), 1);
        drop(live);
    }

    #[tokio::test]
    async fn test_full_subscriber_is_pruned() {
        let hub = BroadcastHub::new(1);
        // The ack fills the single slot
        let slow = hub.subscribe("ws-1");

        let report = hub.broadcast("ws-1", event("ws-1"));
        assert_eq!(report.pruned, 1);
        assert!(hub.active_workspaces().is_empty());
        assert!(!hub.unsubscribe(&slow.id));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent_and_tears_down() {
        let hub = BroadcastHub::default();
        let sub = hub.subscribe("ws-1");
        assert_eq!(hub.active_workspaces(), vec!["ws-1".to_string()]);

        assert!(hub.unsubscribe(&sub.id));
        assert!(!hub.unsubscribe(&sub.id));
        assert!(hub.active_workspaces().is_empty());
        assert_eq!(hub.broadcast("ws-1", event("ws-1")), BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_concurrent_subscribe_and_broadcast() {
        let hub = Arc::new(BroadcastHub::new(256));
        let mut tasks = Vec::new();
        for i in 0..8 {
            let hub = Arc::clone(&hub);
            tasks.push(tokio::spawn(async move {
                let workspace = format!("ws-{}", i % 2);
                let sub = hub.subscribe(&workspace);
                hub.broadcast(&workspace, event(&workspace));
                sub
            }));
        }

        let mut subs = Vec::new();
        for task in tasks {
            subs.push(task.await.unwrap());
        }
        assert_eq!(hub.total_subscribers(), 8);
        assert_eq!(hub.subscriber_count("ws-0"), 4);

        for sub in &subs {
            hub.unsubscribe(&sub.id);
        }
        assert!(hub.active_workspaces().is_empty());
    }

    #[tokio::test]
    async fn test_detached_broadcast_delivers() {
        let hub = Arc::new(BroadcastHub::default());
        let mut sub = hub.subscribe("ws-1");
        sub.recv().await.unwrap();

        hub.broadcast_detached("ws-1".to_string(), event("ws-1"));
        let received = tokio::time::timeout(std::time::Duration::from_secs(1), sub.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.kind, EventKind::MeasurementUpdate);
    }
}
