//! Error types and transport failure classification.

use crate::transport::TransportFailure;
use serde_json::Value;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Structured errors surfaced to callers.
///
/// Every variant produced from a backend answer keeps the original status
/// and error code, so callers can tell "try again later" from "resolve
/// conflict" from "give up".
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// The backend or channel is down.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The backend throttled the request (status 429).
    #[error("throttled: {message} (code {code})")]
    Throttled {
        /// Backend error code, 0 when absent.
        code: i64,
        /// Backend message or a fixed fallback.
        message: String,
    },

    /// The revision precondition failed (status 409).
    ///
    /// Never retried transparently; the caller must refetch and recompute
    /// the write.
    #[error("conflict: {message} (code {code})")]
    Conflict {
        /// Backend error code, 0 when absent.
        code: i64,
        /// Backend message or a fixed fallback.
        message: String,
        /// Full error body as returned.
        body: Value,
    },

    /// Any other backend error status.
    #[error("service error {status}: {message} (code {code})")]
    ServiceError {
        /// HTTP status.
        status: u16,
        /// Backend error code, 0 when absent.
        code: i64,
        /// Backend message or a fixed fallback.
        message: String,
    },

    /// Non-retryable local failure.
    #[error("fatal: {0}")]
    Fatal(String),

    /// A response or pushed payload could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The operation was abandoned locally.
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    /// Classifies a raw transport failure.
    pub fn from_transport(failure: &TransportFailure) -> Self {
        match failure {
            TransportFailure::Status { status, body, .. } => {
                let body = body.as_ref();
                let message = message_from_body(*status, body);
                let code = code_from_body(body);
                match *status {
                    409 => SyncError::Conflict {
                        code,
                        message,
                        body: body.cloned().unwrap_or(Value::Null),
                    },
                    429 => SyncError::Throttled { code, message },
                    status => SyncError::ServiceError {
                        status,
                        code,
                        message,
                    },
                }
            }
            TransportFailure::Unavailable(message) => {
                SyncError::TransportUnavailable(message.clone())
            }
            other => SyncError::Fatal(other.to_string()),
        }
    }

    /// Returns the HTTP status this error was classified from.
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Throttled { .. } => Some(429),
            SyncError::Conflict { .. } => Some(409),
            SyncError::ServiceError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the backend error code, if the backend answered.
    pub fn code(&self) -> Option<i64> {
        match self {
            SyncError::Throttled { code, .. }
            | SyncError::Conflict { code, .. }
            | SyncError::ServiceError { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Returns true if a later attempt may succeed without changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::TransportUnavailable(_) | SyncError::Throttled { .. } => true,
            SyncError::ServiceError { status, .. } => matches!(status, 502..=504),
            _ => false,
        }
    }

    /// Returns true if the caller must reconcile before writing again.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict { .. })
    }
}

impl From<TransportFailure> for SyncError {
    fn from(failure: TransportFailure) -> Self {
        SyncError::from_transport(&failure)
    }
}

impl From<livesync_protocol::ProtocolError> for SyncError {
    fn from(err: livesync_protocol::ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

fn message_from_body(status: u16, body: Option<&Value>) -> String {
    if let Some(message) = body
        .and_then(|b| b.get("message"))
        .and_then(Value::as_str)
    {
        return message.to_string();
    }
    match status {
        429 => "Throttled by server".to_string(),
        404 => "Not found from server".to_string(),
        _ => "Error from server".to_string(),
    }
}

fn code_from_body(body: Option<&Value>) -> i64 {
    body.and_then(|b| b.get("code"))
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn conflict_keeps_body_and_code() {
        let body = json!({"message": "stale", "code": 12, "status": 409});
        let err = SyncError::from_transport(&TransportFailure::status(409).with_body(body.clone()));

        assert_eq!(
            err,
            SyncError::Conflict {
                code: 12,
                message: "stale".into(),
                body,
            }
        );
        assert_eq!(err.status(), Some(409));
        assert!(err.is_conflict());
        assert!(!err.is_retryable());
    }

    #[test]
    fn service_error_fallback_messages() {
        let not_found = SyncError::from_transport(&TransportFailure::status(404));
        assert_eq!(
            not_found,
            SyncError::ServiceError {
                status: 404,
                code: 0,
                message: "Not found from server".into(),
            }
        );

        let generic = SyncError::from_transport(&TransportFailure::status(500));
        assert!(generic.to_string().contains("Error from server"));
        assert_eq!(generic.code(), Some(0));
    }

    #[test]
    fn throttled_keeps_status() {
        let err = SyncError::from_transport(&TransportFailure::status(429));
        assert_eq!(
            err,
            SyncError::Throttled {
                code: 0,
                message: "Throttled by server".into(),
            }
        );
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn body_message_wins_over_fallback() {
        let failure = TransportFailure::status(400)
            .with_body(json!({"message": "Invalid JSON", "code": 54007}));
        let err = SyncError::from_transport(&failure);
        assert_eq!(err.code(), Some(54007));
        assert!(err.to_string().contains("Invalid JSON"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn channel_failures() {
        let err = SyncError::from(TransportFailure::Unavailable("backend down".into()));
        assert_eq!(err, SyncError::TransportUnavailable("backend down".into()));
        assert!(err.is_retryable());
        assert_eq!(err.status(), None);

        assert_eq!(
            SyncError::from(TransportFailure::Timeout),
            SyncError::Fatal("request timeout".into())
        );
        assert_eq!(
            SyncError::from(TransportFailure::Other("bad uri".into())),
            SyncError::Fatal("bad uri".into())
        );
    }

    #[test]
    fn gateway_errors_are_retryable() {
        for status in [502, 503, 504] {
            assert!(SyncError::from(TransportFailure::status(status)).is_retryable());
        }
        assert!(!SyncError::from(TransportFailure::status(500)).is_retryable());
    }
}
