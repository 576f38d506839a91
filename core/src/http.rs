//! HTTP request and response values exchanged with a [`Transport`].
//!
//! # Design
//! Requests are plain data built by `ApiClient::build_*` and never mutated
//! afterwards; the transport is the only layer that adds anything on the wire
//! (the bearer header). Responses carry the body already split into JSON, text
//! or empty so callers do not re-sniff content types.
//!
//! [`Transport`]: crate::transport::Transport

use std::fmt;
use std::time::Duration;

use serde_json::Value;

use crate::error::TransportError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only GET is safe to replay after a transient failure.
    pub fn is_idempotent_read(self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One HTTP call described as data. `path` is relative to the client's base
/// URL and may carry a query string.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        self.body = Some(body);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rejects descriptors no transport should attempt.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.path.trim().is_empty() {
            return Err(TransportError::InvalidRequest("request path is empty".to_string()));
        }
        Ok(())
    }

    /// Path without its query string, used for endpoint matching.
    pub fn endpoint(&self) -> &str {
        endpoint_of(&self.path)
    }
}

pub(crate) fn endpoint_of(path: &str) -> &str {
    path.split_once('?').map_or(path, |(endpoint, _)| endpoint)
}

/// Response body after content-type dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Empty,
}

impl ResponseBody {
    /// Chooses JSON when the content type says so, raw text otherwise.
    /// A body that claims JSON but does not parse is kept as text.
    pub fn from_parts(content_type: Option<&str>, raw: String) -> Self {
        if raw.is_empty() {
            return ResponseBody::Empty;
        }
        let is_json = content_type
            .map(|value| value.to_ascii_lowercase().contains("json"))
            .unwrap_or(false);
        if is_json {
            if let Ok(value) = serde_json::from_str(&raw) {
                return ResponseBody::Json(value);
            }
        }
        ResponseBody::Text(raw)
    }

    /// Converts the body into a JSON value for typed decoding. Empty bodies
    /// decode as `null` so `()` and `Option<T>` targets work for 204s.
    pub fn into_value(self) -> Value {
        match self {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) => Value::String(text),
            ResponseBody::Empty => Value::Null,
        }
    }
}

/// Successful (status < 400) response with timing metadata.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ResponseBody,
    pub duration: Duration,
}
