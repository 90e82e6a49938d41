//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! The hub exposes one websocket endpoint carrying the channel frame
//! protocol and a health probe. Everything else a client needs lives in
//! the sync library.

pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::HubState;

/// Hub routes: `/api/ws` and `/healthz`.
pub fn app(state: HubState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
