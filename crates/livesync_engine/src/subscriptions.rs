//! Registry of subscribed entities.
//!
//! The registry owns the server side of each subscription (establish and
//! cancel requests) and applies routed notifications to the exact entity
//! they target.

use crate::entity::SyncEntity;
use crate::error::SyncResult;
use crate::network::Network;
use crate::subscription::SubscriptionState;
use livesync_protocol::{EntityUpdate, PostOptions, SubscriptionRequest};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// What happened to one routed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Handed to the entity.
    Applied,
    /// The entity was removed remotely and is no longer tracked.
    Removed,
    /// A strictly-ordered update that did not advance the event id.
    OutOfOrder,
    /// No tracked entity has the target sid.
    Untracked,
    /// The payload could not be decoded.
    Malformed,
}

/// Tracks subscribed entities by sid.
pub struct Subscriptions {
    network: Arc<Network>,
    subscriptions_uri: String,
    entities: RwLock<HashMap<String, Arc<dyn SyncEntity>>>,
    connected: AtomicBool,
    revalidations: Mutex<Vec<JoinHandle<()>>>,
}

impl Subscriptions {
    /// Creates an empty registry.
    pub fn new(network: Arc<Network>, subscriptions_uri: impl Into<String>) -> Self {
        Self {
            network,
            subscriptions_uri: subscriptions_uri.into(),
            entities: RwLock::new(HashMap::new()),
            connected: AtomicBool::new(false),
            revalidations: Mutex::new(Vec::new()),
        }
    }

    /// Returns true if an entity with `sid` is tracked.
    pub fn contains(&self, sid: &str) -> bool {
        self.entities.read().contains_key(sid)
    }

    /// Number of tracked entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    /// Returns true if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Returns true once the channel has reported itself ready.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Tracks `entity` and asks the backend to push its updates.
    ///
    /// The entity is tracked before the request goes out, so updates racing
    /// the response are not lost. A failed request leaves the entity
    /// tracked; the caller decides whether the failure is still current
    /// and [`untrack`](Self::untrack)s it.
    pub async fn add(&self, entity: Arc<dyn SyncEntity>) -> SyncResult<()> {
        self.entities
            .write()
            .insert(entity.sid().to_string(), Arc::clone(&entity));

        establish(&self.network, &self.subscriptions_uri, entity.as_ref()).await?;
        debug!(sid = %entity.sid(), kind = %entity.kind(), "subscription established");
        Ok(())
    }

    /// Untracks `sid` and asks the backend to stop pushing its updates.
    pub async fn remove(&self, sid: &str) -> SyncResult<()> {
        let Some(entity) = self.untrack(sid) else {
            return Ok(());
        };
        let body = SubscriptionRequest::cancel(sid, entity.kind()).to_body();
        self.post(body).await?;
        debug!(%sid, "subscription cancelled");
        Ok(())
    }

    /// Stops tracking `sid` without contacting the backend.
    pub fn untrack(&self, sid: &str) -> Option<Arc<dyn SyncEntity>> {
        self.entities.write().remove(sid)
    }

    /// Applies a pushed notification to the entity it targets.
    ///
    /// With `strictly_ordered`, an update whose id does not exceed the
    /// entity's `last_event_id` is dropped.
    pub fn accept_message(&self, payload: &Value, strictly_ordered: bool) -> MessageOutcome {
        let update = match EntityUpdate::from_payload(payload) {
            Ok(update) => update,
            Err(err) => {
                warn!(%err, "malformed notification dropped");
                return MessageOutcome::Malformed;
            }
        };

        let entity = self.entities.read().get(&update.sid).cloned();
        let Some(entity) = entity else {
            trace!(sid = %update.sid, "notification for untracked entity dropped");
            return MessageOutcome::Untracked;
        };

        if update.is_removal() {
            debug!(sid = %update.sid, event_id = update.id, "entity removed remotely");
            self.untrack(&update.sid);
            entity.subscription().reset();
            entity.on_removed(false);
            return MessageOutcome::Removed;
        }

        if strictly_ordered && update.id <= entity.last_event_id() {
            debug!(
                sid = %update.sid,
                event_id = update.id,
                last_event_id = entity.last_event_id(),
                "out-of-order notification dropped"
            );
            return MessageOutcome::OutOfOrder;
        }

        entity.apply_update(&update, strictly_ordered);
        MessageOutcome::Applied
    }

    /// Reacts to a channel readiness change.
    ///
    /// On each transition to connected, every established subscription is
    /// re-established in the background and every entity with a live or
    /// pending subscription is told to refetch, once. Returns without
    /// waiting for the requests. Going offline aborts revalidation still
    /// in progress. Must be called within a tokio runtime.
    pub fn on_connection_state_changed(&self, connected: bool) {
        let was_connected = self.connected.swap(connected, Ordering::SeqCst);
        if !connected {
            if was_connected {
                self.abort_revalidation();
            }
            return;
        }
        if was_connected {
            return;
        }

        let entities: Vec<_> = self.entities.read().values().cloned().collect();
        debug!(count = entities.len(), "channel reconnected, revalidating subscriptions");

        let mut revalidations = self.revalidations.lock();
        revalidations.retain(|task| !task.is_finished());
        for entity in entities {
            match entity.subscription().state() {
                SubscriptionState::None => continue,
                // The outstanding request settles these.
                SubscriptionState::RequestInFlight | SubscriptionState::ResponseInFlight => {
                    entity.on_reconnected();
                }
                SubscriptionState::Established => {
                    let network = Arc::clone(&self.network);
                    let uri = self.subscriptions_uri.clone();
                    revalidations.push(tokio::spawn(async move {
                        if let Err(err) = establish(&network, &uri, entity.as_ref()).await {
                            warn!(sid = %entity.sid(), %err, "resubscribe failed");
                            entity.report_failure(&err);
                        }
                        entity.on_reconnected();
                    }));
                }
            }
        }
    }

    /// Waits for background revalidation started so far.
    pub async fn wait_revalidated(&self) {
        let tasks = std::mem::take(&mut *self.revalidations.lock());
        for task in tasks {
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    warn!(%err, "revalidation task failed");
                }
            }
        }
    }

    fn abort_revalidation(&self) {
        let tasks = std::mem::take(&mut *self.revalidations.lock());
        if !tasks.is_empty() {
            debug!(count = tasks.len(), "channel lost, aborting revalidation");
        }
        for task in tasks {
            task.abort();
        }
    }

    async fn post(&self, body: Value) -> SyncResult<()> {
        post(&self.network, &self.subscriptions_uri, body).await
    }
}

impl Drop for Subscriptions {
    fn drop(&mut self) {
        for task in self.revalidations.get_mut().drain(..) {
            task.abort();
        }
    }
}

async fn establish(network: &Network, uri: &str, entity: &dyn SyncEntity) -> SyncResult<()> {
    let body = SubscriptionRequest::establish(entity.sid(), entity.kind(), entity.last_event_id())
        .to_body();
    post(network, uri, body).await
}

async fn post(network: &Network, uri: &str, body: Value) -> SyncResult<()> {
    let options = PostOptions { channel_only: true };
    network.post(uri, body, None, options).await.map(|_| ())
}
