//! REST API for route-optimization sessions
//!
//! Serves the embedded page, the scenario catalog and one actor-backed session
//! per client. Snapshots stream over Server-Sent Events; the current frame is
//! rendered server-side as SVG.

use crate::config::AppConfig;
use crate::error::SessionError;
use crate::iteration::ReplayLog;
use crate::optimizer::{GenerativeOptimizer, OptimizationParameters, Optimizer, ReqwestTransport};
use crate::page::INDEX_HTML;
use crate::runtime::{spawn_session, Action, SessionHandle, SessionOptions};
use crate::scenario::{self, ScenarioId, ScenarioSummary};
use crate::session::SessionSnapshot;
use crate::NodeId;
use axum::{
    body::Bytes,
    extract::{ConnectInfo, Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use dashmap::DashMap;
use futures_util::Stream;
use governor::{clock::DefaultClock, state::InMemoryState, Quota, RateLimiter};
use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Optimize-request limiter keyed by session id
pub type OptimizeLimiter = RateLimiter<Uuid, DashMap<Uuid, InMemoryState>, DefaultClock>;

/// Session-creation limiter keyed by client address
pub type ClientLimiter = RateLimiter<IpAddr, DashMap<IpAddr, InMemoryState>, DefaultClock>;

/// Key used when the connection address is unknown
const UNKNOWN_CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// A live session and when a request last touched it
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub handle: SessionHandle,
    pub last_active: Instant,
}

/// Shared application state
#[derive(Clone)]
pub struct ApiState {
    /// Live sessions by id
    pub sessions: Arc<DashMap<Uuid, SessionEntry>>,
    /// Backend used by every session
    pub optimizer: Arc<dyn Optimizer>,
    pub config: Arc<AppConfig>,
    pub rate_limiter: Arc<OptimizeLimiter>,
    pub create_limiter: Arc<ClientLimiter>,
}

impl ApiState {
    pub fn new(config: AppConfig, optimizer: Arc<dyn Optimizer>) -> Self {
        let per_minute = NonZeroU32::new(config.optimize_per_minute).unwrap_or(nonzero!(10u32));
        let creates_per_minute =
            NonZeroU32::new(config.sessions_per_minute).unwrap_or(nonzero!(30u32));
        Self {
            sessions: Arc::new(DashMap::new()),
            optimizer,
            config: Arc::new(config),
            rate_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(per_minute))),
            create_limiter: Arc::new(RateLimiter::keyed(Quota::per_minute(creates_per_minute))),
        }
    }

    fn session(&self, id: Uuid) -> Result<SessionHandle, ApiError> {
        let mut entry = self
            .sessions
            .get_mut(&id)
            .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))?;
        entry.last_active = Instant::now();
        Ok(entry.handle.clone())
    }

    /// Close sessions idle since before `now - session_idle_timeout`, plus any
    /// whose actor already stopped. A session with an open event stream is
    /// never idle. Returns the ids removed.
    pub fn expire_idle(&self, now: Instant) -> Vec<Uuid> {
        let timeout = self.config.session_idle_timeout;
        let mut expired = Vec::new();
        self.sessions.retain(|id, entry| {
            let idle = now.saturating_duration_since(entry.last_active) >= timeout
                && entry.handle.subscriber_count() == 0;
            if idle || entry.handle.is_closed() {
                entry.handle.shutdown();
                expired.push(*id);
                false
            } else {
                true
            }
        });
        self.rate_limiter.retain_recent();
        self.create_limiter.retain_recent();
        expired
    }
}

/// Periodically expire idle sessions.
pub fn spawn_session_reaper(state: ApiState) -> JoinHandle<()> {
    let period = (state.config.session_idle_timeout / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let expired = state.expire_idle(Instant::now());
            if !expired.is_empty() {
                tracing::info!(
                    expired = expired.len(),
                    live = state.sessions.len(),
                    "Closed idle sessions"
                );
            }
        }
    })
}

/// Request to create a session
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub scenario: ScenarioId,
    pub node_count: Option<usize>,
    /// Fixed seed for reproducible random topologies
    pub seed: Option<u64>,
}

/// Request to switch scenario
#[derive(Debug, Deserialize)]
pub struct ChangeScenarioRequest {
    pub scenario: ScenarioId,
    pub node_count: Option<usize>,
}

/// Request to select the start node
#[derive(Debug, Deserialize)]
pub struct StartNodeRequest {
    pub node_id: NodeId,
}

/// Live session count
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Unknown or closed session
    NotFound(String),
    /// Invalid request
    BadRequest(String),
    /// Rejected while a request is in flight
    Conflict(String),
    /// Rate limit exceeded
    TooManyRequests(String),
    /// Session cap reached
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::RequestInFlight => ApiError::Conflict(err.to_string()),
            SessionError::Closed => ApiError::NotFound(err.to_string()),
            SessionError::UnknownStartNode(_)
            | SessionError::Parameter(_)
            | SessionError::Scenario(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

/// Rate limiting middleware
///
/// Limits optimize requests per session so a client cannot flood the
/// generative backend.
async fn rate_limit_middleware(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match state.rate_limiter.check_key(&id) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => Err(ApiError::TooManyRequests(
            "Rate limit exceeded. Please try again later.".to_string(),
        )),
    }
}

/// Limits session creation per client address so the optimize limit cannot
/// be sidestepped with fresh sessions.
async fn create_limit_middleware(
    State(state): State<ApiState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let key = connect_info
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(UNKNOWN_CLIENT);
    match state.create_limiter.check_key(&key) {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => Err(ApiError::TooManyRequests(
            "Too many new sessions. Please try again later.".to_string(),
        )),
    }
}

/// Create the API router
pub fn create_router(state: ApiState) -> Router {
    let optimize_route = post(optimize).route_layer(middleware::from_fn_with_state(
        state.clone(),
        rate_limit_middleware,
    ));
    let create_route = post(create_session).route_layer(middleware::from_fn_with_state(
        state.clone(),
        create_limit_middleware,
    ));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/v1/scenarios", get(list_scenarios))
        .route("/api/v1/sessions", create_route)
        .route("/api/v1/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/v1/sessions/:id/scenario", post(change_scenario))
        .route("/api/v1/sessions/:id/reset", post(reset_topology))
        .route("/api/v1/sessions/:id/params", put(set_params))
        .route("/api/v1/sessions/:id/start-node", put(set_start_node))
        .route("/api/v1/sessions/:id/optimize", optimize_route)
        .route("/api/v1/sessions/:id/playback/toggle", post(toggle_playback))
        .route("/api/v1/sessions/:id/playback/skip", post(skip_playback))
        .route("/api/v1/sessions/:id/error/dismiss", post(dismiss_error))
        .route("/api/v1/sessions/:id/frame.svg", get(frame_svg))
        .route("/api/v1/sessions/:id/export", get(export_log))
        .route("/api/v1/sessions/:id/events", get(session_events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET / - Embedded client
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// GET /health
async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        sessions: state.sessions.len(),
    })
}

/// GET /api/v1/scenarios - Scenario catalog
async fn list_scenarios() -> Json<Vec<ScenarioSummary>> {
    Json(scenario::catalog().into_iter().map(ScenarioSummary::from).collect())
}

/// An empty body means defaults; anything else must parse.
fn parse_create_request(body: &[u8]) -> Result<CreateSessionRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(CreateSessionRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid session request: {}", e)))
}

/// POST /api/v1/sessions - Start a session
async fn create_session(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let request = parse_create_request(&body)?;
    if state.sessions.len() >= state.config.max_sessions {
        return Err(ApiError::Unavailable(format!(
            "Session limit of {} reached",
            state.config.max_sessions
        )));
    }
    let options = SessionOptions {
        scenario: request.scenario,
        node_count: request
            .node_count
            .unwrap_or(state.config.default_node_count),
        tick_interval: state.config.tick_interval,
        seed: request.seed,
    };

    let handle = spawn_session(options, Arc::clone(&state.optimizer))?;
    let snapshot = handle.snapshot().await?;
    state.sessions.insert(
        handle.id(),
        SessionEntry {
            handle,
            last_active: Instant::now(),
        },
    );

    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// GET /api/v1/sessions/:id - Current snapshot
async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id)?;
    Ok(Json(handle.snapshot().await?))
}

/// DELETE /api/v1/sessions/:id - Close a session
async fn delete_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let (_, entry) = state
        .sessions
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not found", id)))?;
    entry.handle.shutdown();
    Ok(StatusCode::NO_CONTENT)
}

async fn act(state: &ApiState, id: Uuid, action: Action) -> Result<Json<SessionSnapshot>, ApiError> {
    let handle = state.session(id)?;
    Ok(Json(handle.act(action).await?))
}

/// POST /api/v1/sessions/:id/scenario
async fn change_scenario(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ChangeScenarioRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    let action = Action::ChangeScenario {
        scenario: request.scenario,
        node_count: request.node_count,
    };
    act(&state, id, action).await
}

/// POST /api/v1/sessions/:id/reset - Regenerate the topology
async fn reset_topology(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    act(&state, id, Action::Reset).await
}

/// PUT /api/v1/sessions/:id/params
async fn set_params(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(params): Json<OptimizationParameters>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    act(&state, id, Action::SetParams(params)).await
}

/// PUT /api/v1/sessions/:id/start-node
async fn set_start_node(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StartNodeRequest>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    act(&state, id, Action::SelectStartNode(request.node_id)).await
}

/// POST /api/v1/sessions/:id/optimize - Start a request
///
/// Returns immediately with `loading: true`; the outcome arrives on the
/// event stream.
async fn optimize(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SessionSnapshot>), ApiError> {
    let Json(snapshot) = act(&state, id, Action::Optimize).await?;
    Ok((StatusCode::ACCEPTED, Json(snapshot)))
}

/// POST /api/v1/sessions/:id/playback/toggle
async fn toggle_playback(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    act(&state, id, Action::TogglePlayback).await
}

/// POST /api/v1/sessions/:id/playback/skip
async fn skip_playback(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    act(&state, id, Action::Skip).await
}

/// POST /api/v1/sessions/:id/error/dismiss
async fn dismiss_error(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    act(&state, id, Action::DismissError).await
}

/// GET /api/v1/sessions/:id/frame.svg
async fn frame_svg(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let handle = state.session(id)?;
    let svg = handle.render_svg().await?;
    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response())
}

/// GET /api/v1/sessions/:id/export - Loaded result as a replay log
async fn export_log(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReplayLog>, ApiError> {
    let handle = state.session(id)?;
    handle
        .export()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No result loaded".to_string()))
}

/// GET /api/v1/sessions/:id/events - Snapshot stream
async fn session_events(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::Error>>>, ApiError> {
    let handle = state.session(id)?;
    // Subscribe first so nothing published after the initial snapshot is lost
    let updates = BroadcastStream::new(handle.subscribe()).filter_map(|msg| msg.ok());
    let initial = handle.snapshot().await?;

    let stream = tokio_stream::once(initial)
        .chain(updates)
        .map(|snapshot| SseEvent::default().event("snapshot").json_data(&snapshot));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Install the global tracing subscriber.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // A subscriber may already be installed (tests, embedding)
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Start the API server
pub async fn start_server(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(config.log_json);

    let transport = ReqwestTransport::new(config.request_timeout)?;
    let optimizer = GenerativeOptimizer::new(config.generative_settings(), Arc::new(transport));

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!(
        addr = %addr,
        model = %config.model,
        api_key_env = %config.api_key_env,
        tick_ms = config.tick_interval.as_millis() as u64,
        "Starting route viz server"
    );

    let state = ApiState::new(config, Arc::new(optimizer));
    let reaper = spawn_session_reaper(state.clone());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await;
    reaper.abort();
    served?;

    Ok(())
}
