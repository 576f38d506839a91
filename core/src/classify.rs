//! Maps raw transport failures onto the [`ErrorKind`] taxonomy.
//!
//! | status        | kind            | retryable | user visible |
//! |---------------|-----------------|-----------|--------------|
//! | 401, 403      | Auth            | no        | yes          |
//! | 404           | MissingEndpoint | no        | no           |
//! | 500, 502, 503 | Server          | yes       | yes          |
//! | 0             | Network         | yes       | yes          |
//! | anything else | Unknown         | yes       | yes          |
//!
//! Auth failures only invalidate the session when they come from a protected
//! endpoint. A 401 from `/auth/login` is a wrong password, not an expired
//! session.

use crate::error::{ClassifiedError, ErrorKind, TransportError};
use crate::http::endpoint_of;

/// Endpoints reachable without a session.
pub const PUBLIC_ENDPOINTS: &[&str] = &["/auth/login", "/auth/register", "/health"];

pub fn is_public_endpoint(path: &str) -> bool {
    let endpoint = endpoint_of(path).trim_end_matches('/');
    PUBLIC_ENDPOINTS.contains(&endpoint)
}

/// Classifies the failure of a request sent to `path`.
pub fn classify(error: &TransportError, path: &str) -> ClassifiedError {
    let status = error.status();
    match error {
        TransportError::InvalidRequest(reason) => {
            return ClassifiedError::new(ErrorKind::Unknown, reason.clone(), false, true, status, false);
        }
        TransportError::Decode { reason, .. } => {
            return ClassifiedError::new(
                ErrorKind::Unknown,
                format!("Unexpected response from the server ({reason})"),
                false,
                true,
                status,
                false,
            );
        }
        _ => {}
    }

    let server_message = match error {
        TransportError::Status { message, .. } => message.clone(),
        _ => None,
    };

    match status {
        401 | 403 => {
            let public = is_public_endpoint(path);
            let fallback = if status == 401 {
                "Your session has expired. Please sign in again."
            } else {
                "You do not have permission to perform this action."
            };
            let message = server_message.unwrap_or_else(|| fallback.to_string());
            ClassifiedError::new(ErrorKind::Auth, message, false, true, status, !public)
        }
        404 => ClassifiedError::new(
            ErrorKind::MissingEndpoint,
            format!("Endpoint {} is not available", endpoint_of(path)),
            false,
            false,
            status,
            false,
        ),
        500 | 502 | 503 => {
            let message = server_message.unwrap_or_else(|| "The server encountered an error. Please try again.".to_string());
            ClassifiedError::new(ErrorKind::Server, message, true, true, status, false)
        }
        0 => offline_error(network_message(error)),
        _ => {
            let message = server_message.unwrap_or_else(|| format!("Request failed with status {status}"));
            ClassifiedError::new(ErrorKind::Unknown, message, true, true, status, false)
        }
    }
}

/// Retryable network failure used both for status `0` and for any failure
/// observed while the device reports itself offline.
pub fn offline_error(message: String) -> ClassifiedError {
    ClassifiedError::new(ErrorKind::Network, message, true, true, 0, false)
}

fn network_message(error: &TransportError) -> String {
    match error {
        TransportError::Network { timed_out: true, .. } => "The server took too long to respond.".to_string(),
        _ => "Unable to reach the server. Check your connection.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> TransportError {
        TransportError::Status {
            status: code,
            message: None,
            body: None,
        }
    }

    #[test]
    fn auth_statuses_on_protected_path_trigger_logout() {
        for code in [401, 403] {
            let err = classify(&status(code), "/farms");
            assert_eq!(err.kind(), ErrorKind::Auth);
            assert!(!err.is_retryable());
            assert!(err.is_user_visible());
            assert!(err.triggers_logout(), "{code} on /farms");
        }
    }

    #[test]
    fn auth_statuses_on_public_paths_do_not_trigger_logout() {
        for path in ["/auth/login", "/auth/register", "/health", "/auth/login?next=/farms"] {
            for code in [401, 403] {
                let err = classify(&status(code), path);
                assert_eq!(err.kind(), ErrorKind::Auth);
                assert!(!err.triggers_logout(), "{code} on {path}");
            }
        }
    }

    #[test]
    fn not_found_is_hidden_missing_endpoint() {
        let err = classify(&status(404), "/dashboard/summary?range=30d");
        assert_eq!(err.kind(), ErrorKind::MissingEndpoint);
        assert!(!err.is_retryable());
        assert!(!err.is_user_visible());
        assert_eq!(err.message(), "Endpoint /dashboard/summary is not available");
    }

    #[test]
    fn server_statuses_are_retryable() {
        for code in [500, 502, 503] {
            let err = classify(&status(code), "/farms");
            assert_eq!(err.kind(), ErrorKind::Server);
            assert!(err.is_retryable());
            assert_eq!(err.source_status(), code);
        }
    }

    #[test]
    fn timeout_classifies_as_network() {
        let err = classify(
            &TransportError::Network {
                message: "operation timed out".to_string(),
                timed_out: true,
            },
            "/farms",
        );
        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(err.is_retryable());
        assert_eq!(err.source_status(), 0);
        assert_eq!(err.message(), "The server took too long to respond.");
    }

    #[test]
    fn other_statuses_are_unknown_and_retryable() {
        let err = classify(&status(418), "/farms");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.is_retryable());
        assert_eq!(err.message(), "Request failed with status 418");
    }

    #[test]
    fn server_message_is_preserved() {
        let err = classify(
            &TransportError::Status {
                status: 401,
                message: Some("invalid credentials".to_string()),
                body: None,
            },
            "/auth/login",
        );
        assert_eq!(err.message(), "invalid credentials");
    }

    #[test]
    fn decode_failure_is_not_retried() {
        let err = classify(
            &TransportError::Decode {
                status: 200,
                reason: "missing field `id`".to_string(),
            },
            "/farms",
        );
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(!err.is_retryable());
        assert_eq!(err.source_status(), 200);
    }
}
