//! Pushed updates and subscription request bodies.

use crate::error::{ProtocolError, ProtocolResult};
use crate::notification::EntityKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A state change pushed for one entity.
///
/// The entity sid arrives under a kind-specific key on the entity-kind
/// streams (`document_sid`, `list_sid`, `map_sid`) and as `sid` on the
/// generic event stream; all are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// Backend event type, e.g. `document_updated`.
    pub event_type: String,
    /// Event id; orders updates for one entity.
    pub id: u64,
    /// Target entity sid.
    #[serde(alias = "document_sid", alias = "list_sid", alias = "map_sid")]
    pub sid: String,
    /// Unique name of the target entity, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_name: Option<String>,
    /// Entity revision after this event.
    #[serde(
        default,
        alias = "document_revision",
        alias = "list_revision",
        alias = "map_revision",
        skip_serializing_if = "Option::is_none"
    )]
    pub revision: Option<String>,
    /// Event body.
    #[serde(
        default,
        alias = "document_data",
        alias = "item_data",
        skip_serializing_if = "Value::is_null"
    )]
    pub data: Value,
}

impl EntityUpdate {
    /// Decodes an update from a pushed payload.
    ///
    /// Accepts either the bare update or one wrapped as `{"event": {...}}`.
    pub fn from_payload(payload: &Value) -> ProtocolResult<Self> {
        let inner = match payload.get("event") {
            Some(event) if event.is_object() => event,
            _ => payload,
        };
        if !inner.is_object() {
            return Err(ProtocolError::MissingField("event"));
        }
        Ok(serde_json::from_value(inner.clone())?)
    }

    /// Returns true if the event announces removal of the entity.
    pub fn is_removal(&self) -> bool {
        self.event_type.ends_with("_removed")
    }
}

/// What a subscription request asks the backend to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionAction {
    /// Start pushing updates for the entity.
    Establish,
    /// Stop pushing updates for the entity.
    Cancel,
}

/// Body of a subscription establish/cancel request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Requested action.
    pub action: SubscriptionAction,
    /// Entity sid.
    pub object_sid: String,
    /// Entity kind.
    pub object_type: EntityKind,
    /// Last event the client has applied; the backend replays newer ones.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_event_id: Option<u64>,
}

impl SubscriptionRequest {
    /// Creates an establish request.
    pub fn establish(sid: impl Into<String>, kind: EntityKind, last_event_id: u64) -> Self {
        Self {
            action: SubscriptionAction::Establish,
            object_sid: sid.into(),
            object_type: kind,
            last_event_id: Some(last_event_id),
        }
    }

    /// Creates a cancel request.
    pub fn cancel(sid: impl Into<String>, kind: EntityKind) -> Self {
        Self {
            action: SubscriptionAction::Cancel,
            object_sid: sid.into(),
            object_type: kind,
            last_event_id: None,
        }
    }

    /// Renders the JSON body.
    pub fn to_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
