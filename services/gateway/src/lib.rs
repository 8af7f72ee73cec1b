pub mod api;
pub mod auth;
pub mod broker;
pub mod config;
pub mod dispatch;
pub mod fanout;
pub mod offline;
pub mod registry;
pub mod session;
pub mod state;
pub mod ws_gateway;

pub use state::AppState;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_gateway::ws_handler))
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

mod health {
    use axum::response::IntoResponse;
    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }
    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
