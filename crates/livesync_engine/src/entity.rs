//! The lifecycle contract every live entity implements.

use crate::error::SyncError;
use crate::subscription::SubscriptionStateMachine;
use livesync_protocol::{EntityKind, EntityUpdate};
use parking_lot::Mutex;
use serde_json::Value;
use tracing::trace;

/// A remote entity whose state is kept live by pushed updates.
///
/// Documents, lists and maps implement this contract; the router and the
/// subscription registry call into it without knowing concrete semantics.
pub trait SyncEntity: Send + Sync {
    /// Stable identifier.
    fn sid(&self) -> &str;

    /// Optional alias.
    fn unique_name(&self) -> Option<&str>;

    /// Entity kind.
    fn kind(&self) -> EntityKind;

    /// Id of the last applied event.
    fn last_event_id(&self) -> u64;

    /// The entity's subscription state machine.
    fn subscription(&self) -> &SubscriptionStateMachine;

    /// Applies a pushed update.
    ///
    /// Implementations must not move `last_event_id` backwards.
    fn apply_update(&self, update: &EntityUpdate, strictly_ordered: bool);

    /// Called once the entity no longer exists, locally or remotely.
    fn on_removed(&self, locally: bool);

    /// Receives errors from background work such as subscribing.
    fn report_failure(&self, error: &SyncError);

    /// Called after the channel reconnects so the entity can refetch
    /// whatever it may have missed.
    fn on_reconnected(&self) {}
}

/// Ordering position of an entity in its event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCursor {
    last_event_id: u64,
    revision: Option<String>,
}

impl EventCursor {
    /// Creates a cursor at the given position.
    pub fn new(last_event_id: u64, revision: Option<String>) -> Self {
        Self {
            last_event_id,
            revision,
        }
    }

    /// Id of the last applied event.
    pub fn last_event_id(&self) -> u64 {
        self.last_event_id
    }

    /// Last known revision.
    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }

    /// Moves the cursor to `event_id` if it is newer.
    ///
    /// Returns false, leaving the cursor untouched, for an equal or older
    /// id.
    pub fn advance(&mut self, event_id: u64, revision: Option<String>) -> bool {
        if event_id <= self.last_event_id {
            return false;
        }
        self.last_event_id = event_id;
        if revision.is_some() {
            self.revision = revision;
        }
        true
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    cursor: EventCursor,
    data: Value,
    applied: u64,
    removed: Option<bool>,
    failures: Vec<SyncError>,
    reconnections: u32,
}

/// An in-memory entity.
///
/// Keeps the latest pushed body and records lifecycle callbacks. Serves
/// as the generic event-driven entity and as a test double.
#[derive(Debug)]
pub struct MemoryEntity {
    sid: String,
    unique_name: Option<String>,
    kind: EntityKind,
    subscription: SubscriptionStateMachine,
    state: Mutex<MemoryState>,
}

impl MemoryEntity {
    /// Creates an entity with no applied events.
    pub fn new(sid: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            sid: sid.into(),
            unique_name: None,
            kind,
            subscription: SubscriptionStateMachine::new(),
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Sets the unique name.
    pub fn with_unique_name(mut self, unique_name: impl Into<String>) -> Self {
        self.unique_name = Some(unique_name.into());
        self
    }

    /// Starts from a known position, e.g. a fetched snapshot.
    pub fn with_snapshot(self, last_event_id: u64, revision: impl Into<String>, data: Value) -> Self {
        {
            let mut state = self.state.lock();
            state.cursor = EventCursor::new(last_event_id, Some(revision.into()));
            state.data = data;
        }
        self
    }

    /// Latest body.
    pub fn data(&self) -> Value {
        self.state.lock().data.clone()
    }

    /// Last known revision.
    pub fn revision(&self) -> Option<String> {
        self.state.lock().cursor.revision().map(str::to_string)
    }

    /// Number of updates applied.
    pub fn applied_updates(&self) -> u64 {
        self.state.lock().applied
    }

    /// `Some(locally)` once removed.
    pub fn removed(&self) -> Option<bool> {
        self.state.lock().removed
    }

    /// Errors reported so far.
    pub fn failures(&self) -> Vec<SyncError> {
        self.state.lock().failures.clone()
    }

    /// Number of reconnection notices received.
    pub fn reconnections(&self) -> u32 {
        self.state.lock().reconnections
    }
}

impl SyncEntity for MemoryEntity {
    fn sid(&self) -> &str {
        &self.sid
    }

    fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    fn kind(&self) -> EntityKind {
        self.kind
    }

    fn last_event_id(&self) -> u64 {
        self.state.lock().cursor.last_event_id()
    }

    fn subscription(&self) -> &SubscriptionStateMachine {
        &self.subscription
    }

    fn apply_update(&self, update: &EntityUpdate, strictly_ordered: bool) {
        let mut state = self.state.lock();
        if !state.cursor.advance(update.id, update.revision.clone()) {
            trace!(
                sid = %self.sid,
                event_id = update.id,
                last_event_id = state.cursor.last_event_id(),
                strictly_ordered,
                "stale update ignored"
            );
            return;
        }
        state.data = update.data.clone();
        state.applied += 1;
    }

    fn on_removed(&self, locally: bool) {
        self.state.lock().removed = Some(locally);
    }

    fn report_failure(&self, error: &SyncError) {
        self.state.lock().failures.push(error.clone());
    }

    fn on_reconnected(&self) {
        self.state.lock().reconnections += 1;
    }
}
