//! Notification type identifiers.
//!
//! These strings are part of the backend's wire contract and must match it
//! exactly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a remote entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    /// A single JSON document.
    Document,
    /// An ordered list of items.
    List,
    /// A keyed map of items.
    Map,
}

impl EntityKind {
    /// Returns the kind name used in subscription requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Document => "document",
            EntityKind::List => "list",
            EntityKind::Map => "map",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declared notification type routed from the persistent channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    /// Generic event stream; strictly ordered.
    Event,
    /// Entity-kind update stream.
    Entity(EntityKind),
}

impl NotificationType {
    /// Generic event type identifier.
    pub const EVENT: &'static str = "twilio.sync.event";
    /// Document update type identifier.
    pub const DOCUMENT: &'static str = "com.twilio.rtd.cds.document";
    /// List update type identifier.
    pub const LIST: &'static str = "com.twilio.rtd.cds.list";
    /// Map update type identifier.
    pub const MAP: &'static str = "com.twilio.rtd.cds.map";

    /// Every type the router registers at startup.
    pub const ALL: [NotificationType; 4] = [
        NotificationType::Event,
        NotificationType::Entity(EntityKind::Document),
        NotificationType::Entity(EntityKind::List),
        NotificationType::Entity(EntityKind::Map),
    ];

    /// Parses a wire identifier. Unknown identifiers yield `None`.
    pub fn parse(identifier: &str) -> Option<Self> {
        match identifier {
            Self::EVENT => Some(NotificationType::Event),
            Self::DOCUMENT => Some(NotificationType::Entity(EntityKind::Document)),
            Self::LIST => Some(NotificationType::Entity(EntityKind::List)),
            Self::MAP => Some(NotificationType::Entity(EntityKind::Map)),
            _ => None,
        }
    }

    /// Returns the wire identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::Event => Self::EVENT,
            NotificationType::Entity(EntityKind::Document) => Self::DOCUMENT,
            NotificationType::Entity(EntityKind::List) => Self::LIST,
            NotificationType::Entity(EntityKind::Map) => Self::MAP,
        }
    }

    /// Returns true if updates on this stream must advance the event id.
    pub fn is_strictly_ordered(&self) -> bool {
        matches!(self, NotificationType::Event)
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
