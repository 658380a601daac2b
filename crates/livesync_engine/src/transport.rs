//! Transport layer abstraction.
//!
//! The persistent channel itself (connect, reconnect, framing) lives outside
//! this crate. It is consumed through [`Transport`] for request/response
//! traffic and through [`TransportEvent`]s for pushed messages and
//! connectivity changes.

use async_trait::async_trait;
use livesync_protocol::{headers, Method, PostOptions};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Request or response headers.
pub type Headers = HashMap<String, String>;

/// Result of a single transport call.
pub type TransportResult = Result<TransportResponse, TransportFailure>;

/// A successful transport response.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status.
    pub status: u16,
    /// Response headers.
    pub headers: Headers,
    /// Decoded JSON body.
    pub body: Value,
}

impl TransportResponse {
    /// Creates a `200` response with the given body.
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
            body,
        }
    }
}

/// A raw failure reported by the transport.
///
/// Channel interruptions are distinct variants so that retry decisions
/// never depend on message text.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportFailure {
    /// The backend answered with a non-success status.
    #[error("status {status}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Decoded JSON body, if any.
        body: Option<Value>,
        /// Response headers.
        headers: Headers,
    },

    /// The backend or channel is unavailable.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// The persistent channel dropped while the request was outstanding.
    #[error("channel disconnected")]
    Disconnected,

    /// The request timed out on the channel.
    #[error("request timeout")]
    Timeout,

    /// Any other local failure.
    #[error("{0}")]
    Other(String),
}

impl TransportFailure {
    /// Creates a status failure without body or headers.
    pub fn status(status: u16) -> Self {
        TransportFailure::Status {
            status,
            body: None,
            headers: Headers::new(),
        }
    }

    /// Attaches a JSON body to a status failure.
    pub fn with_body(mut self, value: Value) -> Self {
        if let TransportFailure::Status { body, .. } = &mut self {
            *body = Some(value);
        }
        self
    }

    /// Attaches a header to a status failure.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportFailure::Status { headers, .. } = &mut self {
            headers.insert(name.into(), value.into());
        }
        self
    }

    /// Returns the HTTP status, if the backend answered.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportFailure::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true for channel interruptions that are worth retrying.
    pub fn is_channel_interruption(&self) -> bool {
        matches!(
            self,
            TransportFailure::Unavailable(_)
                | TransportFailure::Disconnected
                | TransportFailure::Timeout
        )
    }

    /// Returns the server-supplied `Retry-After` delay, if numeric.
    pub fn retry_after(&self) -> Option<Duration> {
        let TransportFailure::Status { headers, .. } = self else {
            return None;
        };
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(headers::RETRY_AFTER))
            .and_then(|(_, value)| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }
}

/// Request/response access to the backend.
///
/// Implementations deliver each call over the persistent channel (or an
/// HTTP fallback) and report failures as [`TransportFailure`]s.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issues a GET.
    async fn get(&self, uri: &str, headers: &Headers) -> TransportResult;

    /// Issues a POST.
    async fn post(
        &self,
        uri: &str,
        headers: &Headers,
        body: &Value,
        options: PostOptions,
    ) -> TransportResult;

    /// Issues a PUT.
    async fn put(&self, uri: &str, headers: &Headers, body: &Value) -> TransportResult;

    /// Issues a DELETE.
    async fn delete(&self, uri: &str, headers: &Headers) -> TransportResult;
}

/// Registration of pushed message types with the persistent channel.
pub trait NotificationChannel: Send + Sync {
    /// Asks the channel to deliver messages of the given type.
    fn subscribe(&self, message_type: &str);
}

/// An event emitted by the persistent channel.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A pushed message tagged with its declared type.
    Message {
        /// Declared notification type identifier.
        message_type: String,
        /// Message payload.
        payload: Value,
    },
    /// The channel became ready (`true`) or lost connectivity (`false`).
    TransportReady(bool),
}

/// A request observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Method.
    pub method: Method,
    /// Target URI.
    pub uri: String,
    /// Headers as sent.
    pub headers: Headers,
    /// Body, for POST and PUT.
    pub body: Option<Value>,
}

impl RecordedRequest {
    /// Returns a header value by name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A scripted transport for testing.
///
/// Outcomes are served in FIFO order; once the script is empty every call
/// answers `200 {}`. When gated, calls are recorded immediately but held
/// until [`release`](Self::release) lets them through.
#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<TransportResult>>,
    requests: Mutex<Vec<RecordedRequest>>,
    registered_types: Mutex<Vec<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response.
    pub fn push_ok(&self, body: Value) {
        self.script.lock().push_back(Ok(TransportResponse::ok(body)));
    }

    /// Queues a failure.
    pub fn push_failure(&self, failure: TransportFailure) {
        self.script.lock().push_back(Err(failure));
    }

    /// Holds every subsequent call until released.
    pub fn hold_requests(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets `count` held calls complete.
    pub fn release(&self, count: usize) {
        if let Some(gate) = self.gate.lock().as_ref() {
            gate.add_permits(count);
        }
    }

    /// Returns every request issued so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests issued so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the notification types registered through this channel.
    pub fn registered_types(&self) -> Vec<String> {
        self.registered_types.lock().clone()
    }

    async fn respond(
        &self,
        method: Method,
        uri: &str,
        headers: &Headers,
        body: Option<&Value>,
    ) -> TransportResult {
        self.requests.lock().push(RecordedRequest {
            method,
            uri: uri.to_string(),
            headers: headers.clone(),
            body: body.cloned(),
        });

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(TransportFailure::Disconnected),
            }
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse::ok(Value::Object(Default::default()))))
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, uri: &str, headers: &Headers) -> TransportResult {
        self.respond(Method::Get, uri, headers, None).await
    }

    async fn post(
        &self,
        uri: &str,
        headers: &Headers,
        body: &Value,
        _options: PostOptions,
    ) -> TransportResult {
        self.respond(Method::Post, uri, headers, Some(body)).await
    }

    async fn put(&self, uri: &str, headers: &Headers, body: &Value) -> TransportResult {
        self.respond(Method::Put, uri, headers, Some(body)).await
    }

    async fn delete(&self, uri: &str, headers: &Headers) -> TransportResult {
        self.respond(Method::Delete, uri, headers, None).await
    }
}

impl NotificationChannel for MockTransport {
    fn subscribe(&self, message_type: &str) {
        self.registered_types.lock().push(message_type.to_string());
    }
}
