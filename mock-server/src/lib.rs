//! In-memory stand-in for the maize yield prediction platform API.
//!
//! Serves the auth, farm, user and planting-session endpoints the client core
//! talks to, plus a small `/__*` control surface that lets tests script
//! failures (status sequences, artificial latency) and count hits per path.
//! `/dashboard/summary` is deliberately not routed so clients can exercise
//! their missing-endpoint handling.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

pub const SESSION_TTL_SECS: u64 = 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Farmer,
    Analyst,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Farm {
    pub id: i64,
    pub name: String,
    pub location: Option<String>,
    pub size_hectares: Option<f64>,
    pub owner_id: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlantingSession {
    pub id: i64,
    pub farm_id: i64,
    pub variety: String,
    pub planted_on: String,
    pub expected_harvest: Option<String>,
    pub predicted_yield: Option<f64>,
}

/// Spring-style page wrapper used by the paginated list endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub content: Vec<T>,
    pub total_elements: usize,
    pub page: usize,
    pub size: usize,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
    pub expires_in: u64,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFarm {
    pub name: String,
    pub location: Option<String>,
    pub size_hectares: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFarm {
    pub name: Option<String>,
    pub location: Option<String>,
    pub size_hectares: Option<f64>,
}

#[derive(Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub email: Option<String>,
    pub role: Role,
}

#[derive(Deserialize)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub role: Option<Role>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlantingSession {
    pub farm_id: i64,
    pub variety: String,
    pub planted_on: String,
    pub expected_harvest: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlantingSession {
    pub variety: Option<String>,
    pub expected_harvest: Option<String>,
    pub predicted_yield: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default)]
    pub page: usize,
    pub size: Option<usize>,
    pub farm_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct FaultScript {
    pub path: String,
    pub statuses: Vec<u16>,
}

#[derive(Deserialize)]
pub struct DelayScript {
    pub path: String,
    pub delay_ms: u64,
}

#[derive(Deserialize)]
pub struct HitsQuery {
    pub path: String,
}

struct UserRecord {
    user: User,
    password: String,
}

pub struct Store {
    users: BTreeMap<i64, UserRecord>,
    farms: BTreeMap<i64, Farm>,
    sessions: BTreeMap<i64, PlantingSession>,
    tokens: HashMap<String, i64>,
    next_id: i64,
}

impl Store {
    /// Seeds one admin (`admin` / `admin123`) and one farmer
    /// (`farmer` / `farmer123`).
    fn seeded() -> Self {
        let mut store = Self {
            users: BTreeMap::new(),
            farms: BTreeMap::new(),
            sessions: BTreeMap::new(),
            tokens: HashMap::new(),
            next_id: 1,
        };
        store.insert_user("admin", "admin123", Some("admin@maize.test"), Role::Admin);
        store.insert_user("farmer", "farmer123", None, Role::Farmer);
        store
    }

    fn allocate_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn insert_user(&mut self, username: &str, password: &str, email: Option<&str>, role: Role) -> User {
        let id = self.allocate_id();
        let user = User {
            id,
            username: username.to_string(),
            email: email.map(str::to_string),
            role,
        };
        self.users.insert(
            id,
            UserRecord {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    fn find_by_username(&self, username: &str) -> Option<&UserRecord> {
        self.users.values().find(|record| record.user.username == username)
    }
}

#[derive(Default)]
pub struct Faults {
    scripted: HashMap<String, VecDeque<u16>>,
    delays: HashMap<String, Duration>,
    hits: HashMap<String, u64>,
}

pub type Db = Arc<RwLock<Store>>;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub faults: Arc<RwLock<Faults>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            db: Arc::new(RwLock::new(Store::seeded())),
            faults: Arc::new(RwLock::new(Faults::default())),
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Error response carrying a JSON `{"message": ...}` body.
pub struct ApiFailure(StatusCode, &'static str);

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "message": self.1 }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiFailure>;

pub fn app() -> Router {
    app_with_state(AppState::new())
}

pub fn app_with_state(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/auth/me", get(me))
        .route("/farms", get(list_farms).post(create_farm))
        .route("/farms/{id}", get(get_farm).put(update_farm).delete(delete_farm))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).put(update_user).delete(delete_user))
        .route("/planting-sessions", get(list_sessions).post(create_session))
        .route(
            "/planting-sessions/{id}",
            get(get_session).put(update_session).delete(delete_session),
        )
        .route("/__faults", post(script_faults))
        .route("/__delays", post(script_delay))
        .route("/__hits", get(hits))
        .route("/__reset", post(reset_faults))
        .layer(middleware::from_fn_with_state(state.clone(), inject_faults))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

// Counts the hit, applies any scripted delay, then replays the next scripted
// status for the path instead of calling the handler.
async fn inject_faults(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    if path.starts_with("/__") {
        return next.run(req).await;
    }

    let (delay, scripted) = {
        let mut faults = state.faults.write().await;
        *faults.hits.entry(path.clone()).or_insert(0) += 1;
        let delay = faults.delays.get(&path).copied();
        let scripted = faults.scripted.get_mut(&path).and_then(VecDeque::pop_front);
        (delay, scripted)
    };

    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    if let Some(code) = scripted {
        tracing::debug!(%path, code, "replaying scripted fault");
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, Json(json!({ "message": "injected fault" }))).into_response();
    }
    next.run(req).await
}

async fn authorize(db: &Db, headers: &HeaderMap) -> ApiResult<User> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiFailure(StatusCode::UNAUTHORIZED, "missing bearer token"))?;

    let store = db.read().await;
    store
        .tokens
        .get(token)
        .and_then(|id| store.users.get(id))
        .map(|record| record.user.clone())
        .ok_or(ApiFailure(StatusCode::UNAUTHORIZED, "invalid or expired token"))
}

async fn authorize_admin(db: &Db, headers: &HeaderMap) -> ApiResult<User> {
    let user = authorize(db, headers).await?;
    if user.role != Role::Admin {
        return Err(ApiFailure(StatusCode::FORBIDDEN, "admin role required"));
    }
    Ok(user)
}

fn paginate<T: Clone>(items: Vec<T>, query: &PageQuery) -> Page<T> {
    let size = query.size.unwrap_or(20).max(1);
    let total_elements = items.len();
    let content = items.into_iter().skip(query.page * size).take(size).collect();
    Page {
        content,
        total_elements,
        page: query.page,
        size,
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn login(State(state): State<AppState>, Json(input): Json<LoginRequest>) -> ApiResult<Json<LoginResponse>> {
    let mut store = state.db.write().await;
    let user = store
        .find_by_username(&input.username)
        .filter(|record| record.password == input.password)
        .map(|record| record.user.clone())
        .ok_or(ApiFailure(StatusCode::UNAUTHORIZED, "invalid credentials"))?;

    let token = Uuid::new_v4().to_string();
    store.tokens.insert(token.clone(), user.id);
    tracing::info!(user_id = user.id, "login succeeded");
    Ok(Json(LoginResponse {
        token,
        user,
        expires_in: SESSION_TTL_SECS,
    }))
}

async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    let mut store = state.db.write().await;
    if store.find_by_username(&input.username).is_some() {
        return Err(ApiFailure(StatusCode::CONFLICT, "username already taken"));
    }
    let user = store.insert_user(&input.username, &input.password, input.email.as_deref(), Role::Farmer);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<User>> {
    authorize(&state.db, &headers).await.map(Json)
}

async fn list_farms(State(state): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Farm>>> {
    authorize(&state.db, &headers).await?;
    let store = state.db.read().await;
    Ok(Json(store.farms.values().cloned().collect()))
}

async fn create_farm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateFarm>,
) -> ApiResult<(StatusCode, Json<Farm>)> {
    let owner = authorize(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    let farm = Farm {
        id: store.allocate_id(),
        name: input.name,
        location: input.location,
        size_hectares: input.size_hectares,
        owner_id: owner.id,
    };
    store.farms.insert(farm.id, farm.clone());
    Ok((StatusCode::CREATED, Json(farm)))
}

async fn get_farm(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> ApiResult<Json<Farm>> {
    authorize(&state.db, &headers).await?;
    let store = state.db.read().await;
    store
        .farms
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "farm not found"))
}

async fn update_farm(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<UpdateFarm>,
) -> ApiResult<Json<Farm>> {
    authorize(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    let farm = store
        .farms
        .get_mut(&id)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "farm not found"))?;
    if let Some(name) = input.name {
        farm.name = name;
    }
    if let Some(location) = input.location {
        farm.location = Some(location);
    }
    if let Some(size) = input.size_hectares {
        farm.size_hectares = Some(size);
    }
    Ok(Json(farm.clone()))
}

async fn delete_farm(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    authorize(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    store.sessions.retain(|_, session| session.farm_id != id);
    store
        .farms
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "farm not found"))
}

async fn list_users(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<User>>> {
    authorize_admin(&state.db, &headers).await?;
    let store = state.db.read().await;
    let users = store.users.values().map(|record| record.user.clone()).collect();
    Ok(Json(paginate(users, &query)))
}

async fn create_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreateUser>,
) -> ApiResult<(StatusCode, Json<User>)> {
    authorize_admin(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    if store.find_by_username(&input.username).is_some() {
        return Err(ApiFailure(StatusCode::CONFLICT, "username already taken"));
    }
    let user = store.insert_user(&input.username, &input.password, input.email.as_deref(), input.role);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> ApiResult<Json<User>> {
    authorize_admin(&state.db, &headers).await?;
    let store = state.db.read().await;
    store
        .users
        .get(&id)
        .map(|record| Json(record.user.clone()))
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "user not found"))
}

async fn update_user(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<UpdateUser>,
) -> ApiResult<Json<User>> {
    authorize_admin(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    let record = store
        .users
        .get_mut(&id)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "user not found"))?;
    if let Some(email) = input.email {
        record.user.email = Some(email);
    }
    if let Some(role) = input.role {
        record.user.role = role;
    }
    Ok(Json(record.user.clone()))
}

async fn delete_user(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    let caller = authorize_admin(&state.db, &headers).await?;
    if caller.id == id {
        return Err(ApiFailure(StatusCode::BAD_REQUEST, "cannot delete yourself"));
    }
    let mut store = state.db.write().await;
    store.tokens.retain(|_, user_id| *user_id != id);
    store
        .users
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "user not found"))
}

async fn list_sessions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Page<PlantingSession>>> {
    authorize(&state.db, &headers).await?;
    let store = state.db.read().await;
    let sessions = store
        .sessions
        .values()
        .filter(|session| query.farm_id.map_or(true, |farm_id| session.farm_id == farm_id))
        .cloned()
        .collect();
    Ok(Json(paginate(sessions, &query)))
}

async fn create_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(input): Json<CreatePlantingSession>,
) -> ApiResult<(StatusCode, Json<PlantingSession>)> {
    authorize(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    if !store.farms.contains_key(&input.farm_id) {
        return Err(ApiFailure(StatusCode::BAD_REQUEST, "unknown farm"));
    }
    let session = PlantingSession {
        id: store.allocate_id(),
        farm_id: input.farm_id,
        variety: input.variety,
        planted_on: input.planted_on,
        expected_harvest: input.expected_harvest,
        predicted_yield: None,
    };
    store.sessions.insert(session.id, session.clone());
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> ApiResult<Json<PlantingSession>> {
    authorize(&state.db, &headers).await?;
    let store = state.db.read().await;
    store
        .sessions
        .get(&id)
        .cloned()
        .map(Json)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "planting session not found"))
}

async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(input): Json<UpdatePlantingSession>,
) -> ApiResult<Json<PlantingSession>> {
    authorize(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    let session = store
        .sessions
        .get_mut(&id)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "planting session not found"))?;
    if let Some(variety) = input.variety {
        session.variety = variety;
    }
    if let Some(harvest) = input.expected_harvest {
        session.expected_harvest = Some(harvest);
    }
    if let Some(predicted) = input.predicted_yield {
        session.predicted_yield = Some(predicted);
    }
    Ok(Json(session.clone()))
}

async fn delete_session(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<i64>) -> ApiResult<StatusCode> {
    authorize(&state.db, &headers).await?;
    let mut store = state.db.write().await;
    store
        .sessions
        .remove(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .ok_or(ApiFailure(StatusCode::NOT_FOUND, "planting session not found"))
}

async fn script_faults(State(state): State<AppState>, Json(script): Json<FaultScript>) -> StatusCode {
    let mut faults = state.faults.write().await;
    faults.scripted.entry(script.path).or_default().extend(script.statuses);
    StatusCode::NO_CONTENT
}

async fn script_delay(State(state): State<AppState>, Json(script): Json<DelayScript>) -> StatusCode {
    let mut faults = state.faults.write().await;
    faults.delays.insert(script.path, Duration::from_millis(script.delay_ms));
    StatusCode::NO_CONTENT
}

async fn hits(State(state): State<AppState>, Query(query): Query<HitsQuery>) -> Json<serde_json::Value> {
    let faults = state.faults.read().await;
    let count = faults.hits.get(&query.path).copied().unwrap_or(0);
    Json(json!({ "path": query.path, "count": count }))
}

async fn reset_faults(State(state): State<AppState>) -> StatusCode {
    *state.faults.write().await = Faults::default();
    StatusCode::NO_CONTENT
}
