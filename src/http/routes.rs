//! HTTP route definitions

use std::time::Duration;

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::app::AppState;
use crate::util::time::uptime_secs;

/// Build the status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(Duration::from_secs(10))),
        )
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
    })
}

// ============================================================================
// Status endpoint
// ============================================================================

#[derive(Serialize)]
struct StatusResponse {
    sessions: usize,
    max_sessions: usize,
    tick: u64,
    tick_rate: u32,
    cars: usize,
    targets: usize,
    projectiles: usize,
    explosions: usize,
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    let stats = state.stats.snapshot();

    Json(StatusResponse {
        sessions: state.registry.len(),
        max_sessions: state.config.max_sessions,
        tick: stats.tick,
        tick_rate: state.config.tick_rate,
        cars: stats.cars,
        targets: stats.targets,
        projectiles: stats.projectiles,
        explosions: stats.explosions,
    })
}
