//! Operator HTTP surface

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::game::authority::AuthorityStatsSnapshot;
use crate::net::session::SessionStatsSnapshot;
use crate::util::time::{server_time_of_day, uptime_secs};

/// Build the operator router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/actors/:identity", get(actor_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    connections: usize,
    actors: usize,
    ticks: u64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        connections: state.sessions.connection_count(),
        actors: state.authority.len(),
        ticks: state.sessions.ticks(),
    })
}

// ============================================================================
// Stats endpoint
// ============================================================================

#[derive(Serialize)]
struct StatsResponse {
    tick_rate: u32,
    heartbeat_timeout_secs: u64,
    max_clients: usize,
    anti_cheat_tolerance: f32,
    session: SessionStatsSnapshot,
    movement: AuthorityStatsSnapshot,
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        tick_rate: state.config.tick_rate,
        heartbeat_timeout_secs: state.config.heartbeat_timeout.as_secs(),
        max_clients: state.config.max_clients,
        anti_cheat_tolerance: state.config.movement.anti_cheat_tolerance,
        session: state.sessions.stats().snapshot(),
        movement: state.authority.stats().snapshot(),
    })
}

// ============================================================================
// Actor lookup
// ============================================================================

#[derive(Serialize)]
struct ActorResponse {
    identity: String,
    class: String,
    x: f32,
    y: f32,
    z: f32,
    yaw: f32,
    pitch: f32,
    last_processed_sequence: u32,
    idle_secs: f32,
    endpoint: Option<String>,
    server_time: f32,
}

async fn actor_handler(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<ActorResponse>, AppError> {
    let actor = state
        .authority
        .get(&identity)
        .ok_or_else(|| AppError::NotFound(format!("No actor named {identity}")))?;

    let endpoint = state
        .sessions
        .connection(&identity)
        .map(|c| c.endpoint.to_string());

    Ok(Json(ActorResponse {
        class: actor.class.to_string(),
        x: actor.position.x,
        y: actor.position.y,
        z: actor.position.z,
        yaw: actor.yaw,
        pitch: actor.pitch,
        last_processed_sequence: actor.last_processed_sequence,
        idle_secs: actor.last_update.elapsed().as_secs_f32(),
        endpoint,
        server_time: server_time_of_day(),
        identity,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
