//! Retrying request executor.
//!
//! Every logical operation runs in its own retry loop:
//! 1. Attempt the request with fresh headers
//! 2. On a transient failure, wait out the backoff delay and try again
//! 3. Surface the first non-retryable error, or the last error once the
//!    time budget is spent
//!
//! The loop only suspends at the backoff sleep. Dropping the returned
//! future drops the pending timer with it, so nothing stays scheduled once
//! an operation settles.

use crate::config::{BackoffConfig, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::transport::{Headers, Transport, TransportFailure, TransportResponse, TransportResult};
use livesync_protocol::{headers, ClientInfo, Method, OperationRequest, PostOptions};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Statuses retried for every method.
const GATEWAY_STATUSES: [u16; 3] = [502, 503, 504];
/// Throttling status, retried only when the request allows it.
const THROTTLED_STATUS: u16 = 429;

/// Mutable state of one operation's retry loop.
#[derive(Debug, Clone)]
pub struct RetryContext {
    started: Instant,
    attempts: u32,
    last_delay: Option<Duration>,
}

impl RetryContext {
    /// Starts a context at the current instant.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            attempts: 0,
            last_delay: None,
        }
    }

    /// Number of attempts made so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Time since the first attempt.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// The most recent backoff delay, if any retry happened.
    pub fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    /// Computes the wait before the next attempt.
    ///
    /// A server-supplied delay overrides the backoff policy. The wait is cut
    /// to whatever remains of the budget, and `None` means the budget is
    /// spent.
    fn next_delay(
        &mut self,
        backoff: &BackoffConfig,
        server_delay: Option<Duration>,
    ) -> Option<Duration> {
        let remaining = backoff.max_attempts_time.checked_sub(self.elapsed())?;
        if remaining.is_zero() {
            return None;
        }
        let retry = self.attempts.saturating_sub(1);
        let delay = server_delay
            .unwrap_or_else(|| backoff.delay_for_retry(retry))
            .min(remaining);
        self.last_delay = Some(delay);
        Some(delay)
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes remote operations with automatic retry and backoff.
///
/// `Network` is shared read-only across concurrent operations; each call
/// owns its own [`RetryContext`].
pub struct Network {
    client_info: String,
    backoff: BackoffConfig,
    transport: Arc<dyn Transport>,
}

impl Network {
    /// Creates an executor over the given transport.
    pub fn new(config: &SyncConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_parts(&config.client_info, config.backoff.clone(), transport)
    }

    /// Creates an executor from individual parts.
    pub fn with_parts(
        client_info: &ClientInfo,
        backoff: BackoffConfig,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            client_info: client_info.to_header_value(),
            backoff,
            transport,
        }
    }

    /// Returns the backoff configuration.
    pub fn backoff(&self) -> &BackoffConfig {
        &self.backoff
    }

    /// Builds the headers for one attempt, with a new correlation id.
    pub fn create_headers(&self, revision: Option<&str>) -> Headers {
        let mut headers = Headers::new();
        headers.insert(headers::CONTENT_TYPE.to_string(), headers::JSON.to_string());
        headers.insert(headers::CLIENT_INFO.to_string(), self.client_info.clone());
        headers.insert(headers::REQUEST_ID.to_string(), new_request_id());
        if let Some(revision) = revision {
            headers.insert(headers::IF_MATCH.to_string(), revision.to_string());
        }
        headers
    }

    /// Executes an operation request.
    pub async fn execute(&self, request: &OperationRequest) -> SyncResult<TransportResponse> {
        let revision = request.revision.as_deref();
        let body = request.body.clone().unwrap_or(Value::Null);
        let body = &body;
        let method = request.method;
        let uri = request.uri.as_str();
        let options = request.options;
        let transport = &self.transport;

        self.execute_with_retry(
            move || {
                let headers = self.create_headers(revision);
                async move {
                    debug!(%method, uri, request_id = %request_id(&headers), "sending request");
                    match method {
                        Method::Get => transport.get(uri, &headers).await,
                        Method::Post => transport.post(uri, &headers, body, options).await,
                        Method::Put => transport.put(uri, &headers, body).await,
                        Method::Delete => transport.delete(uri, &headers).await,
                    }
                }
            },
            request.retry_when_throttled,
        )
        .await
    }

    /// GETs a resource; retried on throttling.
    pub async fn get(&self, uri: &str) -> SyncResult<TransportResponse> {
        self.execute(&OperationRequest::get(uri)).await
    }

    /// POSTs a body, optionally conditional on `revision`.
    pub async fn post(
        &self,
        uri: &str,
        body: Value,
        revision: Option<&str>,
        options: PostOptions,
    ) -> SyncResult<TransportResponse> {
        let mut request = OperationRequest::post(uri, body).with_options(options);
        if let Some(revision) = revision {
            request = request.with_revision(revision);
        }
        self.execute(&request).await
    }

    /// PUTs a body, optionally conditional on `revision`.
    pub async fn put(
        &self,
        uri: &str,
        body: Value,
        revision: Option<&str>,
    ) -> SyncResult<TransportResponse> {
        let mut request = OperationRequest::put(uri, body);
        if let Some(revision) = revision {
            request = request.with_revision(revision);
        }
        self.execute(&request).await
    }

    /// DELETEs a resource.
    pub async fn delete(&self, uri: &str) -> SyncResult<TransportResponse> {
        self.execute(&OperationRequest::delete(uri)).await
    }

    /// Runs `request` until it succeeds, fails fatally, or the time budget
    /// is spent.
    ///
    /// `502`, `503` and `504` are always retried, `429` only when
    /// `retry_when_throttled` is set. Channel interruptions are retried too.
    pub async fn execute_with_retry<F, Fut>(
        &self,
        mut request: F,
        retry_when_throttled: bool,
    ) -> SyncResult<TransportResponse>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TransportResult>,
    {
        let mut context = RetryContext::new();

        loop {
            context.attempts += 1;
            let failure = match request().await {
                Ok(response) => {
                    if context.attempts > 1 {
                        debug!(attempts = context.attempts, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(failure) => failure,
            };

            let error = SyncError::from_transport(&failure);
            if !should_retry(&failure, retry_when_throttled) {
                debug!(%error, attempts = context.attempts, "request failed");
                return Err(error);
            }

            let Some(delay) = context.next_delay(&self.backoff, failure.retry_after()) else {
                warn!(
                    %error,
                    attempts = context.attempts,
                    elapsed_ms = context.elapsed().as_millis() as u64,
                    "retry budget exhausted"
                );
                return Err(error);
            };

            warn!(
                %error,
                attempt = context.attempts,
                delay_ms = delay.as_millis() as u64,
                "request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

fn should_retry(failure: &TransportFailure, retry_when_throttled: bool) -> bool {
    match failure.status_code() {
        Some(status) if GATEWAY_STATUSES.contains(&status) => true,
        Some(THROTTLED_STATUS) => retry_when_throttled,
        Some(_) => false,
        None => failure.is_channel_interruption(),
    }
}

fn new_request_id() -> String {
    format!("RQ{}", uuid::Uuid::new_v4().simple())
}

fn request_id(headers: &Headers) -> &str {
    headers
        .get(headers::REQUEST_ID)
        .map(String::as_str)
        .unwrap_or_default()
}
