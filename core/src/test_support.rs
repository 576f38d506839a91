// Scripted transport shared by the unit tests.
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse, ResponseBody};
use crate::transport::{status_error, Transport};

type Scripted = Result<(u16, ResponseBody), TransportError>;

// Replays queued outcomes per endpoint; unscripted endpoints answer 404.
#[derive(Default)]
pub struct ScriptedTransport {
    queued: Mutex<HashMap<String, VecDeque<Scripted>>>,
    delays: Mutex<HashMap<String, Duration>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_json(&self, path: &str, status: u16, body: Value) -> &Self {
        self.push(path, Ok((status, ResponseBody::Json(body))))
    }

    pub fn push_status(&self, path: &str, status: u16) -> &Self {
        self.push(path, Ok((status, ResponseBody::Empty)))
    }

    pub fn push_network_error(&self, path: &str) -> &Self {
        self.push(
            path,
            Err(TransportError::Network {
                message: "connection refused".to_string(),
                timed_out: false,
            }),
        )
    }

    pub fn set_delay(&self, path: &str, delay: Duration) {
        self.delays.lock().insert(path.to_string(), delay);
    }

    pub fn calls(&self, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.endpoint() == path)
            .count()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    fn push(&self, path: &str, outcome: Scripted) -> &Self {
        self.queued
            .lock()
            .entry(path.to_string())
            .or_default()
            .push_back(outcome);
        self
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        request.validate()?;
        self.requests.lock().push(request.clone());

        let endpoint = request.endpoint().to_string();
        let delay = self.delays.lock().get(&endpoint).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .queued
            .lock()
            .get_mut(&endpoint)
            .and_then(VecDeque::pop_front)
            .unwrap_or(Ok((404, ResponseBody::Empty)));

        let (status, body) = next?;
        if status >= 400 {
            return Err(status_error(status, body));
        }
        Ok(HttpResponse {
            status,
            headers: Vec::new(),
            body,
            duration: Duration::ZERO,
        })
    }
}
