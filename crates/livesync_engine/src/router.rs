//! Notification router.
//!
//! Single ingress point for everything the persistent channel pushes. The
//! router registers the declared notification types at construction,
//! forwards updates to the subscription registry, and drives each entity's
//! subscription state machine.

use crate::entity::SyncEntity;
use crate::subscriptions::{MessageOutcome, Subscriptions};
use crate::transport::{NotificationChannel, TransportEvent};
use livesync_protocol::NotificationType;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Routes pushed messages to their consumers.
pub struct Router {
    subscriptions: Arc<Subscriptions>,
}

impl Router {
    /// Creates a router and registers every declared notification type.
    pub fn new(notifications: &dyn NotificationChannel, subscriptions: Arc<Subscriptions>) -> Self {
        for notification_type in NotificationType::ALL {
            notifications.subscribe(notification_type.as_str());
        }
        Self { subscriptions }
    }

    /// Returns the subscription registry.
    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.subscriptions
    }

    /// Routes one pushed message.
    ///
    /// Returns `None` for unrecognized types, which are dropped.
    pub fn on_message(&self, message_type: &str, payload: &Value) -> Option<MessageOutcome> {
        trace!(message_type, %payload, "notification received");
        let Some(notification_type) = NotificationType::parse(message_type) else {
            debug!(message_type, "unrecognized notification type dropped");
            return None;
        };
        Some(
            self.subscriptions
                .accept_message(payload, notification_type.is_strictly_ordered()),
        )
    }

    /// Handles one channel event.
    ///
    /// Readiness changes start revalidation in the background, so routing
    /// never waits on a resubscribe. Must be called within a tokio runtime.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message {
                message_type,
                payload,
            } => {
                self.on_message(&message_type, &payload);
            }
            TransportEvent::TransportReady(connected) => {
                debug!(connected, "transport readiness changed");
                self.subscriptions.on_connection_state_changed(connected);
            }
        }
    }

    /// Processes events in arrival order until the sender side closes,
    /// then waits for outstanding revalidation.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        while let Some(event) = events.recv().await {
            self.handle_event(event);
        }
        debug!("transport event stream closed");
        self.subscriptions.wait_revalidated().await;
    }

    /// Spawns [`run`](Self::run) onto the current runtime.
    pub fn spawn(
        self: Arc<Self>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(events).await })
    }

    /// Subscribes `entity` to pushed updates.
    ///
    /// A no-op unless the entity is unsubscribed. Failures revert the
    /// state and are reported to the entity. A response that arrives after
    /// the entity was closed or removed is ignored.
    pub async fn subscribe(&self, entity: &Arc<dyn SyncEntity>) {
        let machine = entity.subscription();
        let Some(ticket) = machine.begin_subscribe() else {
            trace!(sid = entity.sid(), state = %machine.state(), "subscribe skipped");
            return;
        };

        match self.subscriptions.add(Arc::clone(entity)).await {
            Ok(()) => {
                if !machine.finish_subscribe(ticket, true) {
                    debug!(sid = entity.sid(), "late subscribe response ignored");
                }
            }
            Err(err) => {
                if !machine.finish_subscribe(ticket, false) {
                    debug!(sid = entity.sid(), %err, "late subscribe failure ignored");
                    return;
                }
                warn!(sid = entity.sid(), %err, "subscribe failed");
                self.subscriptions.untrack(entity.sid());
                entity.report_failure(&err);
            }
        }
    }

    /// Cancels the subscription of `entity`.
    ///
    /// A no-op unless the subscription is established. Always ends
    /// unsubscribed; a failed cancel request is only logged.
    pub async fn unsubscribe(&self, entity: &Arc<dyn SyncEntity>) {
        let machine = entity.subscription();
        let Some(ticket) = machine.begin_unsubscribe() else {
            trace!(sid = entity.sid(), state = %machine.state(), "unsubscribe skipped");
            return;
        };

        if let Err(err) = self.subscriptions.remove(entity.sid()).await {
            warn!(sid = entity.sid(), %err, "unsubscribe failed");
        }
        machine.finish_unsubscribe(ticket);
    }

    /// Closes `entity`: cancels a live subscription and stops routing to it.
    pub async fn close(&self, entity: &Arc<dyn SyncEntity>) {
        self.unsubscribe(entity).await;
        self.subscriptions.untrack(entity.sid());
        entity.subscription().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackoffConfig;
    use crate::entity::MemoryEntity;
    use crate::network::Network;
    use crate::subscription::SubscriptionState;
    use crate::transport::{MockTransport, Transport, TransportFailure};
    use livesync_protocol::{ClientInfo, EntityKind};
    use serde_json::json;

    fn router(transport: &Arc<MockTransport>) -> Router {
        let network = Network::with_parts(
            &ClientInfo::new("rust", "0.0.0"),
            BackoffConfig::no_jitter(),
            Arc::clone(transport) as Arc<dyn Transport>,
        );
        let subscriptions = Arc::new(Subscriptions::new(Arc::new(network), "/v3/Subscriptions"));
        Router::new(transport.as_ref(), subscriptions)
    }

    #[test]
    fn registers_declared_types_at_startup() {
        let transport = Arc::new(MockTransport::new());
        let _router = router(&transport);
        assert_eq!(
            transport.registered_types(),
            vec![
                "twilio.sync.event",
                "com.twilio.rtd.cds.document",
                "com.twilio.rtd.cds.list",
                "com.twilio.rtd.cds.map",
            ]
        );
    }

    #[tokio::test]
    async fn routes_by_declared_type() {
        let transport = Arc::new(MockTransport::new());
        let router = router(&transport);
        let entity = Arc::new(MemoryEntity::new("ES1", EntityKind::List));
        let handle: Arc<dyn SyncEntity> = entity.clone();
        router.subscribe(&handle).await;

        let update = json!({"event_type": "list_item_added", "id": 5, "list_sid": "ES1"});
        assert_eq!(
            router.on_message("com.twilio.rtd.cds.list", &update),
            Some(MessageOutcome::Applied)
        );
        // The same id on the strictly-ordered stream does not advance.
        assert_eq!(
            router.on_message("twilio.sync.event", &json!({ "event": update })),
            Some(MessageOutcome::OutOfOrder)
        );
        assert_eq!(router.on_message("twilio.sync.typing", &update), None);
        assert_eq!(entity.last_event_id(), 5);
    }

    #[tokio::test]
    async fn failed_subscribe_reverts_and_reports() {
        let transport = Arc::new(MockTransport::new());
        transport.push_failure(TransportFailure::status(404));
        let router = router(&transport);
        let entity = Arc::new(MemoryEntity::new("ET1", EntityKind::Document));
        let handle: Arc<dyn SyncEntity> = entity.clone();

        router.subscribe(&handle).await;

        assert_eq!(entity.subscription().state(), SubscriptionState::None);
        assert_eq!(entity.failures().len(), 1);
        assert_eq!(entity.failures()[0].status(), Some(404));
    }

    #[tokio::test]
    async fn unsubscribe_failure_still_resets() {
        let transport = Arc::new(MockTransport::new());
        let router = router(&transport);
        let entity = Arc::new(MemoryEntity::new("ET1", EntityKind::Document));
        let handle: Arc<dyn SyncEntity> = entity.clone();
        router.subscribe(&handle).await;
        assert_eq!(entity.subscription().state(), SubscriptionState::Established);

        transport.push_failure(TransportFailure::status(500));
        router.unsubscribe(&handle).await;

        assert_eq!(entity.subscription().state(), SubscriptionState::None);
        assert!(entity.failures().is_empty());
        assert!(!router.subscriptions().contains("ET1"));
    }

    #[tokio::test]
    async fn unsubscribe_requires_established() {
        let transport = Arc::new(MockTransport::new());
        let router = router(&transport);
        let handle: Arc<dyn SyncEntity> = Arc::new(MemoryEntity::new("ET1", EntityKind::Map));

        router.unsubscribe(&handle).await;
        assert_eq!(transport.request_count(), 0);
    }

    #[tokio::test]
    async fn close_cancels_and_stops_routing() {
        let transport = Arc::new(MockTransport::new());
        let router = router(&transport);
        let entity = Arc::new(MemoryEntity::new("MP1", EntityKind::Map));
        let handle: Arc<dyn SyncEntity> = entity.clone();
        router.subscribe(&handle).await;

        router.close(&handle).await;

        assert_eq!(transport.request_count(), 2);
        assert_eq!(entity.subscription().state(), SubscriptionState::None);
        let update = json!({"event_type": "map_item_updated", "id": 1, "map_sid": "MP1"});
        assert_eq!(
            router.on_message("com.twilio.rtd.cds.map", &update),
            Some(MessageOutcome::Untracked)
        );
    }

    #[tokio::test]
    async fn run_drains_events_in_order() {
        let transport = Arc::new(MockTransport::new());
        let router = Arc::new(router(&transport));
        let entity = Arc::new(MemoryEntity::new("ET1", EntityKind::Document));
        let handle: Arc<dyn SyncEntity> = entity.clone();
        router.subscribe(&handle).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let task = Arc::clone(&router).spawn(rx);
        for id in 1..=3 {
            tx.send(TransportEvent::Message {
                message_type: "com.twilio.rtd.cds.document".into(),
                payload: json!({"event_type": "document_updated", "id": id, "document_sid": "ET1", "document_data": {"id": id}}),
            })
            .unwrap();
        }
        tx.send(TransportEvent::TransportReady(true)).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(entity.applied_updates(), 3);
        assert_eq!(entity.data(), json!({"id": 3}));
        assert_eq!(entity.reconnections(), 1);
    }

    /// Lets the two held requests answer one after the other.
    async fn release_in_order(transport: &MockTransport) {
        transport.release(1);
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        transport.release(1);
    }

    #[tokio::test]
    async fn late_response_after_close_does_not_settle_a_new_subscribe() {
        let transport = Arc::new(MockTransport::new());
        transport.hold_requests();
        transport.push_ok(json!({}));
        transport.push_failure(TransportFailure::status(403));
        let router = router(&transport);
        let entity = Arc::new(MemoryEntity::new("ET1", EntityKind::Document));
        let handle: Arc<dyn SyncEntity> = entity.clone();

        let first = router.subscribe(&handle);
        let second = async {
            tokio::task::yield_now().await;
            router.close(&handle).await;
            assert_eq!(entity.subscription().state(), SubscriptionState::None);

            let resubscribe = router.subscribe(&handle);
            let release = async {
                tokio::task::yield_now().await;
                assert_eq!(transport.request_count(), 2);
                release_in_order(&transport).await;
            };
            tokio::join!(resubscribe, release);
        };
        tokio::join!(first, second);

        assert_eq!(transport.request_count(), 2);
        assert_eq!(entity.subscription().state(), SubscriptionState::None);
        assert!(!router.subscriptions().contains("ET1"));
        assert_eq!(entity.failures().len(), 1);
        assert_eq!(entity.failures()[0].status(), Some(403));
    }

    #[tokio::test]
    async fn late_failure_after_close_keeps_the_new_subscription() {
        let transport = Arc::new(MockTransport::new());
        transport.hold_requests();
        transport.push_failure(TransportFailure::status(403));
        let router = router(&transport);
        let entity = Arc::new(MemoryEntity::new("ET1", EntityKind::Document));
        let handle: Arc<dyn SyncEntity> = entity.clone();

        let first = router.subscribe(&handle);
        let second = async {
            tokio::task::yield_now().await;
            router.close(&handle).await;
            let resubscribe = router.subscribe(&handle);
            let release = async {
                tokio::task::yield_now().await;
                release_in_order(&transport).await;
            };
            tokio::join!(resubscribe, release);
        };
        tokio::join!(first, second);

        assert_eq!(entity.subscription().state(), SubscriptionState::Established);
        assert!(router.subscriptions().contains("ET1"));
        assert!(entity.failures().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn messages_keep_flowing_while_resubscribe_retries() {
        let transport = Arc::new(MockTransport::new());
        let router = Arc::new(router(&transport));
        let entity = Arc::new(MemoryEntity::new("ET1", EntityKind::Document));
        let handle: Arc<dyn SyncEntity> = entity.clone();
        router.subscribe(&handle).await;
        for _ in 0..20 {
            transport.push_failure(TransportFailure::status(503));
        }

        let start = tokio::time::Instant::now();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = Arc::clone(&router).spawn(rx);
        tx.send(TransportEvent::TransportReady(true)).unwrap();
        tx.send(TransportEvent::Message {
            message_type: "com.twilio.rtd.cds.document".into(),
            payload: json!({"event_type": "document_updated", "id": 1, "document_sid": "ET1"}),
        })
        .unwrap();

        for _ in 0..10 {
            if entity.applied_updates() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(entity.applied_updates(), 1);
        assert_eq!(start.elapsed(), std::time::Duration::ZERO);

        drop(tx);
        task.await.unwrap();
        assert_eq!(entity.failures()[0].status(), Some(503));
        assert_eq!(entity.reconnections(), 1);
    }
}
