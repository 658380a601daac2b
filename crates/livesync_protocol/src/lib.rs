//! # LiveSync Protocol
//!
//! Wire types shared by the LiveSync client layers.
//!
//! This crate provides:
//! - `OperationRequest` describing one logical REST call
//! - Header names and `ClientInfo` metadata attached to every request
//! - Notification type identifiers routed from the persistent channel
//! - `EntityUpdate` pushed-update messages and subscription request bodies
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod client_info;
mod error;
mod messages;
mod notification;
mod operation;

pub use client_info::ClientInfo;
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{EntityUpdate, SubscriptionAction, SubscriptionRequest};
pub use notification::{EntityKind, NotificationType};
pub use operation::{headers, Method, OperationRequest, PostOptions};
