// HTTP + WebSocket routes

mod http;
mod ws;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use tower_http::cors::{Any, CorsLayer};

use crate::dashboard::Dashboard;
use crate::pipeline::Pipeline;
use crate::scrap_repo::ScrapRepo;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub dashboard: Arc<Dashboard>,
    /// None when running without a store (tests, or persistence disabled).
    pub repo: Option<Arc<ScrapRepo>>,
    pub ws_clients: Arc<AtomicUsize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "scrapwatch is running" })) // GET /
        .route("/version", get(http::version_handler)) // GET /version
        .route(
            "/api/machines/{machine_id}/scrap",
            post(http::ingest_handler),
        ) // POST /api/machines/{id}/scrap
        .route(
            "/api/machines/{machine_id}/history",
            get(http::history_handler),
        ) // GET /api/machines/{id}/history
        .route(
            "/api/machines/{machine_id}/scrap/{scrap_index}/totals",
            get(http::totals_handler),
        ) // GET /api/machines/{id}/scrap/{index}/totals
        .route("/api/groups", get(http::groups_handler)) // GET /api/groups
        .route("/api/filters", get(http::filters_handler)) // GET /api/filters
        .route("/api/records", get(http::records_handler)) // GET /api/records
        .route("/ws/scrap", get(ws::ws_scrap)) // WS /ws/scrap
        .route("/ws/dashboard", get(ws::ws_dashboard)) // WS /ws/dashboard
        .layer(CorsLayer::new().allow_origin(Any))
        .with_state(state)
}
