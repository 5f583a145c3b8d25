//! drift-pier: the rendezvous server. Owns the presence registry and the
//! pairing engine, and speaks the signaling protocol with every client over
//! one WebSocket per connection.

pub mod cli;
pub mod config;
pub mod handlers;
pub mod registry;
pub mod websocket;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::websocket::SignalingState;

/// The full HTTP surface: health, stats, and the signaling upgrade.
pub fn build_router(state: SignalingState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/stats", get(handlers::stats))
        .route("/ws", get(websocket::websocket_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
