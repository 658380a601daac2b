//! Operation requests.

use serde_json::Value;
use std::fmt;

/// Header names attached to outgoing requests.
pub mod headers {
    /// Body content type.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// JSON-serialized [`ClientInfo`](crate::ClientInfo).
    pub const CLIENT_INFO: &str = "Twilio-Sync-Client-Info";
    /// Per-attempt correlation id.
    pub const REQUEST_ID: &str = "Twilio-Request-Id";
    /// Expected revision for conditional writes.
    pub const IF_MATCH: &str = "If-Match";
    /// Server-supplied retry delay, in seconds.
    pub const RETRY_AFTER: &str = "Retry-After";
    /// Content type of every request body.
    pub const JSON: &str = "application/json";
}

/// HTTP-style method of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Read.
    Get,
    /// Create or command.
    Post,
    /// Replace.
    Put,
    /// Remove.
    Delete,
}

impl Method {
    /// Returns true if repeating the operation has no additional effect.
    pub fn is_idempotent_read(&self) -> bool {
        matches!(self, Method::Get)
    }

    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport options for POST requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostOptions {
    /// Send only over the persistent channel, never a fallback HTTP path.
    pub channel_only: bool,
}

/// An immutable description of one logical network call.
///
/// Created per call and discarded once the call resolves. Throttle
/// retries default to on for reads and off for writes; use
/// [`with_throttle_retry`](Self::with_throttle_retry) to opt a write in.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    /// Method.
    pub method: Method,
    /// Target URI.
    pub uri: String,
    /// JSON body (POST and PUT).
    pub body: Option<Value>,
    /// Expected revision, sent as `If-Match`.
    pub revision: Option<String>,
    /// Whether a 429 response is retried.
    pub retry_when_throttled: bool,
    /// POST transport options.
    pub options: PostOptions,
}

impl OperationRequest {
    fn new(method: Method, uri: impl Into<String>, body: Option<Value>) -> Self {
        Self {
            method,
            uri: uri.into(),
            body,
            revision: None,
            retry_when_throttled: method.is_idempotent_read(),
            options: PostOptions::default(),
        }
    }

    /// Creates a GET request.
    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::Get, uri, None)
    }

    /// Creates a POST request.
    pub fn post(uri: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Post, uri, Some(body))
    }

    /// Creates a PUT request.
    pub fn put(uri: impl Into<String>, body: Value) -> Self {
        Self::new(Method::Put, uri, Some(body))
    }

    /// Creates a DELETE request.
    pub fn delete(uri: impl Into<String>) -> Self {
        Self::new(Method::Delete, uri, None)
    }

    /// Sets the expected revision precondition.
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Overrides throttle-retry eligibility.
    pub fn with_throttle_retry(mut self, allow: bool) -> Self {
        self.retry_when_throttled = allow;
        self
    }

    /// Sets POST transport options.
    pub fn with_options(mut self, options: PostOptions) -> Self {
        self.options = options;
        self
    }
}
