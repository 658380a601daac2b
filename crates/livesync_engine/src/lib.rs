//! # LiveSync Engine
//!
//! Reliability and subscription layer of the LiveSync real-time client.
//!
//! This crate provides:
//! - Classification of transport failures into [`SyncError`]
//! - A retrying executor ([`Network`]) with exponential backoff and jitter
//! - The per-entity subscription state machine
//! - A registry that applies pushed updates to subscribed entities
//! - The notification router, the single ingress for pushed messages
//!
//! ## Architecture
//!
//! Application code fetches and mutates entities through [`Network`].
//! Concurrently, the persistent channel feeds [`TransportEvent`]s into the
//! [`Router`], which hands updates to [`Subscriptions`] and from there to
//! the matching [`SyncEntity`].
//!
//! ## Key Invariants
//!
//! - Only 502/503/504, opted-in 429 and channel interruptions are retried
//! - Conflicts (409) are never retried transparently
//! - At most one subscription request per entity is in flight
//! - `last_event_id` never moves backwards

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entity;
mod error;
mod network;
mod router;
mod subscription;
mod subscriptions;
mod transport;

pub use config::{BackoffConfig, SyncConfig};
pub use entity::{EventCursor, MemoryEntity, SyncEntity};
pub use error::{SyncError, SyncResult};
pub use network::{Network, RetryContext};
pub use router::Router;
pub use subscription::{SubscriptionState, SubscriptionStateMachine, SubscriptionTicket};
pub use subscriptions::{MessageOutcome, Subscriptions};
pub use transport::{
    Headers, MockTransport, NotificationChannel, RecordedRequest, Transport, TransportEvent,
    TransportFailure, TransportResponse, TransportResult,
};
