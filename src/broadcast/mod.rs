//! # Broadcast Hub
//!
//! Live subscribers per workspace and the typed events fanned out to them.
//! The hub is an owned value; callers share it through `Arc`.

pub mod events;
pub mod hub;

pub use events::{EventKind, HubEvent};
pub use hub::{BroadcastHub, BroadcastReport, SubscriberId, Subscription, DEFAULT_SUBSCRIBER_BUFFER};
