//! Typed client for the maize platform API.
//!
//! # Design
//! Every endpoint is split into a `build_*` method that produces an
//! [`HttpRequest`] and a call through [`ApiClient::execute`], which owns the
//! request pipeline:
//!
//! 1. send through the [`Transport`], retrying GETs under the
//!    [`RetryController`] (other methods get a single attempt);
//! 2. classify the final failure and, when it invalidates the session, raise
//!    the global logout on [`AuthState`];
//! 3. substitute [`Fallback`] data for a missing endpoint;
//! 4. decode the body into the caller's type.
//!
//! The typed wrappers (`list_farms`, `dashboard_summary`, ...) only pick the
//! request, the response shape and the fallback.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthState;
use crate::classify::classify;
use crate::config::{ClientConfig, ConfigError};
use crate::connectivity::Connectivity;
use crate::error::{RequestFailure, TransportError};
use crate::fallback::Fallback;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::retry::{RetryController, RetryPolicy};
use crate::session::SessionCell;
use crate::storage::SessionStorage;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{
    DashboardSummary, Farm, FarmUpdate, HealthStatus, ListShape, NewFarm, NewPlantingSession, NewUser, Page,
    PlantingSession, PlantingSessionUpdate, User, UserUpdate,
};

pub const FARMS_PATH: &str = "/farms";
pub const USERS_PATH: &str = "/users";
pub const PLANTING_SESSIONS_PATH: &str = "/planting-sessions";
pub const DASHBOARD_SUMMARY_PATH: &str = "/dashboard/summary";
pub const HEALTH_PATH: &str = "/health";

/// Per-call knobs for [`ApiClient::execute`].
#[derive(Debug, Clone)]
pub struct CallOptions<T> {
    pub fallback: Fallback<T>,
    pub cancel: CancellationToken,
}

impl<T> Default for CallOptions<T> {
    fn default() -> Self {
        Self {
            fallback: Fallback::None,
            cancel: CancellationToken::new(),
        }
    }
}

impl<T> CallOptions<T> {
    pub fn cancellable(cancel: CancellationToken) -> Self {
        Self {
            fallback: Fallback::None,
            cancel,
        }
    }

    pub fn with_fallback(mut self, data: T) -> Self {
        self.fallback = Fallback::Data(data);
        self
    }
}

/// Paging and filtering for list endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub page: usize,
    pub size: Option<usize>,
    pub farm_id: Option<i64>,
}

impl ListQuery {
    fn to_query_string(self) -> String {
        let mut params = Vec::new();
        if self.page > 0 {
            params.push(format!("page={}", self.page));
        }
        if let Some(size) = self.size {
            params.push(format!("size={size}"));
        }
        if let Some(farm_id) = self.farm_id {
            params.push(format!("farmId={farm_id}"));
        }
        if params.is_empty() {
            String::new()
        } else {
            format!("?{}", params.join("&"))
        }
    }
}

#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    retry: RetryController,
    auth: Arc<AuthState>,
    timeout: Duration,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>, retry: RetryController, auth: Arc<AuthState>) -> Self {
        Self {
            transport,
            retry,
            auth,
            timeout: crate::http::DEFAULT_TIMEOUT,
        }
    }

    /// Wires a reqwest transport, a fresh session and an [`AuthState`] from
    /// `config`.
    pub fn from_config(
        config: &ClientConfig,
        storage: Arc<dyn SessionStorage>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Result<Self, ConfigError> {
        let session = SessionCell::new();
        let transport: Arc<dyn Transport> = Arc::new(
            ReqwestTransport::new(&config.base_url, session.reader())
                .map_err(|err| ConfigError::HttpClient(err.to_string()))?
                .with_debug(config.debug),
        );
        let auth = AuthState::new(Arc::clone(&transport), session, storage).with_timeout(config.timeout);
        let retry = RetryController::new(config.retry, connectivity);
        tracing::debug!(base_url = %config.base_url, "api client configured");
        Ok(Self::new(transport, retry, Arc::new(auth)).with_timeout(config.timeout))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn auth(&self) -> &Arc<AuthState> {
        &self.auth
    }

    pub fn build_list_farms(&self) -> HttpRequest {
        self.request(HttpMethod::Get, FARMS_PATH.to_string())
    }

    pub fn build_get_farm(&self, id: i64) -> HttpRequest {
        self.request(HttpMethod::Get, format!("{FARMS_PATH}/{id}"))
    }

    pub fn build_create_farm(&self, input: &NewFarm) -> Result<HttpRequest, RequestFailure> {
        self.json_request(HttpMethod::Post, FARMS_PATH.to_string(), input)
    }

    pub fn build_update_farm(&self, id: i64, input: &FarmUpdate) -> Result<HttpRequest, RequestFailure> {
        self.json_request(HttpMethod::Put, format!("{FARMS_PATH}/{id}"), input)
    }

    pub fn build_delete_farm(&self, id: i64) -> HttpRequest {
        self.request(HttpMethod::Delete, format!("{FARMS_PATH}/{id}"))
    }

    pub fn build_list_users(&self, query: ListQuery) -> HttpRequest {
        self.request(HttpMethod::Get, format!("{USERS_PATH}{}", query.to_query_string()))
    }

    pub fn build_get_user(&self, id: i64) -> HttpRequest {
        self.request(HttpMethod::Get, format!("{USERS_PATH}/{id}"))
    }

    pub fn build_create_user(&self, input: &NewUser) -> Result<HttpRequest, RequestFailure> {
        self.json_request(HttpMethod::Post, USERS_PATH.to_string(), input)
    }

    pub fn build_update_user(&self, id: i64, input: &UserUpdate) -> Result<HttpRequest, RequestFailure> {
        self.json_request(HttpMethod::Put, format!("{USERS_PATH}/{id}"), input)
    }

    pub fn build_delete_user(&self, id: i64) -> HttpRequest {
        self.request(HttpMethod::Delete, format!("{USERS_PATH}/{id}"))
    }

    pub fn build_list_planting_sessions(&self, query: ListQuery) -> HttpRequest {
        self.request(
            HttpMethod::Get,
            format!("{PLANTING_SESSIONS_PATH}{}", query.to_query_string()),
        )
    }

    pub fn build_get_planting_session(&self, id: i64) -> HttpRequest {
        self.request(HttpMethod::Get, format!("{PLANTING_SESSIONS_PATH}/{id}"))
    }

    pub fn build_create_planting_session(&self, input: &NewPlantingSession) -> Result<HttpRequest, RequestFailure> {
        self.json_request(HttpMethod::Post, PLANTING_SESSIONS_PATH.to_string(), input)
    }

    pub fn build_update_planting_session(
        &self,
        id: i64,
        input: &PlantingSessionUpdate,
    ) -> Result<HttpRequest, RequestFailure> {
        self.json_request(HttpMethod::Put, format!("{PLANTING_SESSIONS_PATH}/{id}"), input)
    }

    pub fn build_delete_planting_session(&self, id: i64) -> HttpRequest {
        self.request(HttpMethod::Delete, format!("{PLANTING_SESSIONS_PATH}/{id}"))
    }

    pub fn build_dashboard_summary(&self) -> HttpRequest {
        self.request(HttpMethod::Get, DASHBOARD_SUMMARY_PATH.to_string())
    }

    pub fn build_health(&self) -> HttpRequest {
        self.request(HttpMethod::Get, HEALTH_PATH.to_string())
    }

    /// Runs `request` through retry, classification, the logout signal and
    /// fallback substitution, then decodes the body as `T`.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        options: CallOptions<T>,
    ) -> Result<T, RequestFailure> {
        let endpoint = request.endpoint().to_string();
        let result = self
            .send(&request, &options.cancel)
            .await
            .and_then(|response| decode(response, &endpoint, serde_json::from_value));
        options.fallback.resolve(result)
    }

    /// Like [`execute`](Self::execute) for list endpoints of the given shape.
    pub async fn execute_list<T: DeserializeOwned>(
        &self,
        request: HttpRequest,
        shape: ListShape,
        options: CallOptions<Page<T>>,
    ) -> Result<Page<T>, RequestFailure> {
        let endpoint = request.endpoint().to_string();
        let result = self
            .send(&request, &options.cancel)
            .await
            .and_then(|response| decode(response, &endpoint, |value| shape.decode(value)));
        options.fallback.resolve(result)
    }

    pub async fn list_farms(&self, cancel: CancellationToken) -> Result<Page<Farm>, RequestFailure> {
        self.execute_list(self.build_list_farms(), ListShape::Array, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn get_farm(&self, id: i64, cancel: CancellationToken) -> Result<Farm, RequestFailure> {
        self.execute(self.build_get_farm(id), CallOptions::cancellable(cancel))
            .await
    }

    pub async fn create_farm(&self, input: &NewFarm, cancel: CancellationToken) -> Result<Farm, RequestFailure> {
        self.execute(self.build_create_farm(input)?, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn update_farm(
        &self,
        id: i64,
        input: &FarmUpdate,
        cancel: CancellationToken,
    ) -> Result<Farm, RequestFailure> {
        self.execute(self.build_update_farm(id, input)?, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn delete_farm(&self, id: i64, cancel: CancellationToken) -> Result<(), RequestFailure> {
        self.execute(self.build_delete_farm(id), CallOptions::cancellable(cancel))
            .await
    }

    pub async fn list_users(&self, query: ListQuery, cancel: CancellationToken) -> Result<Page<User>, RequestFailure> {
        self.execute_list(self.build_list_users(query), ListShape::Paged, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn get_user(&self, id: i64, cancel: CancellationToken) -> Result<User, RequestFailure> {
        self.execute(self.build_get_user(id), CallOptions::cancellable(cancel))
            .await
    }

    pub async fn create_user(&self, input: &NewUser, cancel: CancellationToken) -> Result<User, RequestFailure> {
        self.execute(self.build_create_user(input)?, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn update_user(
        &self,
        id: i64,
        input: &UserUpdate,
        cancel: CancellationToken,
    ) -> Result<User, RequestFailure> {
        self.execute(self.build_update_user(id, input)?, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn delete_user(&self, id: i64, cancel: CancellationToken) -> Result<(), RequestFailure> {
        self.execute(self.build_delete_user(id), CallOptions::cancellable(cancel))
            .await
    }

    pub async fn list_planting_sessions(
        &self,
        query: ListQuery,
        cancel: CancellationToken,
    ) -> Result<Page<PlantingSession>, RequestFailure> {
        self.execute_list(
            self.build_list_planting_sessions(query),
            ListShape::Paged,
            CallOptions::cancellable(cancel),
        )
        .await
    }

    pub async fn get_planting_session(
        &self,
        id: i64,
        cancel: CancellationToken,
    ) -> Result<PlantingSession, RequestFailure> {
        self.execute(self.build_get_planting_session(id), CallOptions::cancellable(cancel))
            .await
    }

    pub async fn create_planting_session(
        &self,
        input: &NewPlantingSession,
        cancel: CancellationToken,
    ) -> Result<PlantingSession, RequestFailure> {
        self.execute(self.build_create_planting_session(input)?, CallOptions::cancellable(cancel))
            .await
    }

    pub async fn update_planting_session(
        &self,
        id: i64,
        input: &PlantingSessionUpdate,
        cancel: CancellationToken,
    ) -> Result<PlantingSession, RequestFailure> {
        self.execute(
            self.build_update_planting_session(id, input)?,
            CallOptions::cancellable(cancel),
        )
        .await
    }

    pub async fn delete_planting_session(&self, id: i64, cancel: CancellationToken) -> Result<(), RequestFailure> {
        self.execute(self.build_delete_planting_session(id), CallOptions::cancellable(cancel))
            .await
    }

    /// Dashboard counters, or the all-zero summary when the backend has no
    /// such endpoint.
    pub async fn dashboard_summary(&self, cancel: CancellationToken) -> Result<DashboardSummary, RequestFailure> {
        let options = CallOptions::cancellable(cancel).with_fallback(DashboardSummary::default());
        self.execute(self.build_dashboard_summary(), options).await
    }

    pub async fn health(&self, cancel: CancellationToken) -> Result<HealthStatus, RequestFailure> {
        self.execute(self.build_health(), CallOptions::cancellable(cancel))
            .await
    }

    fn request(&self, method: HttpMethod, path: String) -> HttpRequest {
        HttpRequest::new(method, path).with_timeout(self.timeout)
    }

    fn json_request<B: Serialize>(
        &self,
        method: HttpMethod,
        path: String,
        body: &B,
    ) -> Result<HttpRequest, RequestFailure> {
        let value = serde_json::to_value(body)
            .map_err(|err| classify(&TransportError::InvalidRequest(err.to_string()), &path))?;
        Ok(self.request(method, path).with_json(value))
    }

    async fn send(&self, request: &HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse, RequestFailure> {
        let endpoint = request.endpoint();
        let retry = if request.method.is_idempotent_read() {
            self.retry.clone()
        } else {
            self.retry.with_policy(RetryPolicy::none())
        };

        let outcome = retry
            .run(cancel, move |attempt| async move {
                tracing::debug!(attempt, method = %request.method, path = %request.path, "sending request");
                self.transport
                    .send(request)
                    .await
                    .map_err(|err| classify(&err, endpoint))
            })
            .await;

        if outcome.attempts > 1 {
            tracing::debug!(path = %request.path, attempts = outcome.attempts, "request needed retries");
        }
        if let Err(RequestFailure::Failed(err)) = &outcome.result {
            if err.triggers_logout() {
                self.auth.expire_session();
            }
        }
        outcome.into_result()
    }
}

fn decode<T, F>(response: HttpResponse, endpoint: &str, parse: F) -> Result<T, RequestFailure>
where
    F: FnOnce(Value) -> Result<T, serde_json::Error>,
{
    let status = response.status;
    parse(response.body.into_value()).map_err(|err| {
        tracing::warn!(endpoint, status, error = %err, "response body did not match the expected shape");
        let reason = err.to_string();
        RequestFailure::Failed(classify(&TransportError::Decode { status, reason }, endpoint))
    })
}
