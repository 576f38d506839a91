//! Single-attempt HTTP execution.
//!
//! A [`Transport`] turns one [`HttpRequest`] into either an [`HttpResponse`]
//! (status < 400) or a [`TransportError`]. It never retries and never
//! substitutes data; those decisions belong to the layers above.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, ResponseBody};
use crate::session::SessionReader;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// reqwest-backed transport bound to one API base URL.
#[derive(Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    base_url: String,
    session: SessionReader,
    debug: bool,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, session: SessionReader) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
            debug: false,
        })
    }

    /// Logs request and response bodies at debug level.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        request.validate()?;

        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self
            .http
            .request(method, self.url_for(&request.path))
            .timeout(request.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(token) = self.session.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = &request.body {
            if self.debug {
                tracing::debug!(method = %request.method, path = %request.path, %body, "request body");
            }
            builder = builder.json(body);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(network_error)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let raw = response.text().await.map_err(network_error)?;
        let duration = started.elapsed();

        tracing::debug!(
            method = %request.method,
            path = %request.path,
            status,
            elapsed_ms = duration.as_millis() as u64,
            "http round-trip"
        );
        if self.debug {
            tracing::debug!(path = %request.path, body = %raw, "response body");
        }

        let body = ResponseBody::from_parts(content_type.as_deref(), raw);
        if status >= 400 {
            return Err(status_error(status, body));
        }
        Ok(HttpResponse {
            status,
            headers,
            body,
            duration,
        })
    }
}

fn network_error(err: reqwest::Error) -> TransportError {
    TransportError::Network {
        message: err.to_string(),
        timed_out: err.is_timeout(),
    }
}

/// Builds the raw error for a >= 400 response, lifting a `message` (or
/// `error`) field out of a JSON body when the server sent one.
pub(crate) fn status_error(status: u16, body: ResponseBody) -> TransportError {
    match body {
        ResponseBody::Json(value) => {
            let message = ["message", "error"]
                .iter()
                .find_map(|key| value.get(*key).and_then(Value::as_str))
                .map(str::to_string);
            TransportError::Status {
                status,
                message,
                body: Some(value),
            }
        }
        ResponseBody::Text(_) | ResponseBody::Empty => TransportError::Status {
            status,
            message: None,
            body: None,
        },
    }
}
