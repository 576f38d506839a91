//! Error types for the platform API client.
//!
//! # Design
//! Failures exist at two levels. [`TransportError`] is what a single HTTP
//! attempt produced, raw and unjudged. [`ClassifiedError`] is the normalized
//! verdict derived from it once per failed call: what kind of failure it was,
//! whether another attempt may help, whether the user should see it, and
//! whether it invalidates the session. Classified errors are immutable; their
//! fields are only reachable through accessors.

use serde_json::Value;
use thiserror::Error;

/// Raw outcome of one failed transport attempt.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The server answered with a status >= 400.
    #[error("HTTP {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Status {
        status: u16,
        message: Option<String>,
        body: Option<Value>,
    },

    /// No response was received: connection failure or timeout.
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },

    /// The request descriptor was rejected before sending.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A 2xx body could not be decoded into the expected type.
    #[error("response decode failed: {reason}")]
    Decode { status: u16, reason: String },
}

impl TransportError {
    /// Status code of the response involved, with `0` standing in for "no
    /// response": network failures and requests rejected before sending.
    pub fn status(&self) -> u16 {
        match self {
            TransportError::Status { status, .. } | TransportError::Decode { status, .. } => *status,
            TransportError::Network { .. } | TransportError::InvalidRequest(_) => 0,
        }
    }
}

/// Failure taxonomy shared by every layer above the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    MissingEndpoint,
    Server,
    Network,
    Unknown,
}

/// Normalized description of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    kind: ErrorKind,
    message: String,
    retryable: bool,
    user_visible: bool,
    source_status: u16,
    triggers_logout: bool,
}

impl ClassifiedError {
    pub(crate) fn new(
        kind: ErrorKind,
        message: String,
        retryable: bool,
        user_visible: bool,
        source_status: u16,
        triggers_logout: bool,
    ) -> Self {
        Self {
            kind,
            message,
            retryable,
            user_visible,
            source_status,
            triggers_logout,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_user_visible(&self) -> bool {
        self.user_visible
    }

    pub fn source_status(&self) -> u16 {
        self.source_status
    }

    /// True when the failure means the current session is no longer valid
    /// and every consumer should be logged out.
    pub fn triggers_logout(&self) -> bool {
        self.triggers_logout
    }

    /// True when the request never reached the network, e.g. a descriptor
    /// rejected before sending.
    pub fn is_local(&self) -> bool {
        self.source_status == 0 && self.kind != ErrorKind::Network
    }

    /// Whether the UI should offer an explicit "try again" action.
    pub fn offers_retry(&self) -> bool {
        self.user_visible && self.retryable
    }
}

/// Terminal failure of a logical request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestFailure {
    #[error(transparent)]
    Failed(#[from] ClassifiedError),

    /// The owner cancelled the request; no state was touched.
    #[error("request cancelled")]
    Cancelled,
}

impl RequestFailure {
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            RequestFailure::Failed(err) => Some(err),
            RequestFailure::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestFailure::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display_includes_message() {
        let err = TransportError::Status {
            status: 503,
            message: Some("maintenance".to_string()),
            body: None,
        };
        assert_eq!(err.to_string(), "HTTP 503: maintenance");
        assert_eq!(err.status(), 503);
    }

    #[test]
    fn network_error_uses_zero_status() {
        let err = TransportError::Network {
            message: "connection refused".to_string(),
            timed_out: false,
        };
        assert_eq!(err.status(), 0);
    }

    #[test]
    fn decode_error_keeps_response_status() {
        let err = TransportError::Decode {
            status: 200,
            reason: "missing field `id`".to_string(),
        };
        assert_eq!(err.status(), 200);
        assert_eq!(TransportError::InvalidRequest("empty path".to_string()).status(), 0);
    }

    #[test]
    fn offers_retry_requires_visible_and_retryable() {
        let hidden = ClassifiedError::new(ErrorKind::MissingEndpoint, "gone".into(), false, false, 404, false);
        assert!(!hidden.offers_retry());
        let server = ClassifiedError::new(ErrorKind::Server, "boom".into(), true, true, 500, false);
        assert!(server.offers_retry());
    }
}
