use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::websocket::SignalingState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "drift-pier",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    /// Entries currently waiting for a partner
    pub waiting: usize,
    /// Open (non-closed) paired sessions
    pub active_sessions: usize,
    /// Connected signaling channels
    pub channels: usize,
}

pub async fn stats(State(state): State<SignalingState>) -> Json<StatsResponse> {
    let (waiting, active_sessions) = state.registry().counts();
    Json(StatsResponse {
        waiting,
        active_sessions,
        channels: state.channel_count(),
    })
}
