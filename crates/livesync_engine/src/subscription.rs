//! Per-entity subscription state machine.

use parking_lot::Mutex;
use std::fmt;
use tracing::trace;

/// Subscription state of one entity.
///
/// ```text
/// None ──subscribe──▶ RequestInFlight ──ok──▶ Established
///   ▲                       │ err                  │ unsubscribe
///   └───────────────────────┴─── ResponseInFlight ◀┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    /// Not subscribed.
    #[default]
    None,
    /// A subscribe request is outstanding.
    RequestInFlight,
    /// An unsubscribe request is outstanding.
    ResponseInFlight,
    /// Updates are being pushed for the entity.
    Established,
}

impl SubscriptionState {
    /// Returns true while a request is outstanding.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            SubscriptionState::RequestInFlight | SubscriptionState::ResponseInFlight
        )
    }

    /// Returns the wire-style state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionState::None => "none",
            SubscriptionState::RequestInFlight => "request_in_flight",
            SubscriptionState::ResponseInFlight => "response_in_flight",
            SubscriptionState::Established => "established",
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one outstanding subscribe or unsubscribe request.
///
/// Only the ticket of the most recent `begin_*` call can settle the state;
/// [`reset`](SubscriptionStateMachine::reset) invalidates every ticket
/// issued before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionTicket(u64);

#[derive(Debug, Default)]
struct Inner {
    state: SubscriptionState,
    generation: u64,
}

/// Guards subscription transitions for one entity.
///
/// Transitions are not reentrant: a `begin_*` call that finds another
/// request outstanding returns `None` and changes nothing, so the caller
/// skips issuing a second request.
#[derive(Debug, Default)]
pub struct SubscriptionStateMachine {
    inner: Mutex<Inner>,
}

impl SubscriptionStateMachine {
    /// Creates a machine in [`SubscriptionState::None`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    pub fn state(&self) -> SubscriptionState {
        self.inner.lock().state
    }

    /// Moves `None → RequestInFlight`. Returns `None` from any other state.
    pub fn begin_subscribe(&self) -> Option<SubscriptionTicket> {
        self.begin(SubscriptionState::None, SubscriptionState::RequestInFlight)
    }

    /// Settles a subscribe request: `Established` on success, else `None`.
    ///
    /// Returns false, changing nothing, if `ticket` is stale.
    pub fn finish_subscribe(&self, ticket: SubscriptionTicket, succeeded: bool) -> bool {
        let next = if succeeded {
            SubscriptionState::Established
        } else {
            SubscriptionState::None
        };
        self.finish(ticket, SubscriptionState::RequestInFlight, next)
    }

    /// Moves `Established → ResponseInFlight`. Returns `None` from any
    /// other state.
    pub fn begin_unsubscribe(&self) -> Option<SubscriptionTicket> {
        self.begin(
            SubscriptionState::Established,
            SubscriptionState::ResponseInFlight,
        )
    }

    /// Settles an unsubscribe request; ends in `None` unless `ticket` is
    /// stale.
    pub fn finish_unsubscribe(&self, ticket: SubscriptionTicket) -> bool {
        self.finish(
            ticket,
            SubscriptionState::ResponseInFlight,
            SubscriptionState::None,
        )
    }

    /// Forces `None`, e.g. when the entity is closed or removed.
    ///
    /// Responses to requests begun before the reset are ignored.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = SubscriptionState::None;
        inner.generation += 1;
    }

    fn begin(
        &self,
        from: SubscriptionState,
        to: SubscriptionState,
    ) -> Option<SubscriptionTicket> {
        let mut inner = self.inner.lock();
        let current = inner.state;
        if current != from {
            trace!(%current, %from, %to, "subscription transition skipped");
            return None;
        }
        inner.state = to;
        inner.generation += 1;
        Some(SubscriptionTicket(inner.generation))
    }

    fn finish(
        &self,
        ticket: SubscriptionTicket,
        from: SubscriptionState,
        to: SubscriptionState,
    ) -> bool {
        let mut inner = self.inner.lock();
        let current = inner.state;
        if ticket.0 != inner.generation || current != from {
            trace!(%current, %from, %to, "stale subscription response ignored");
            return false;
        }
        inner.state = to;
        true
    }
}
