use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::pipeline::HairPipeline;

/// Base64 photos are roughly a third larger than the files they carry.
pub const MAX_REQUEST_BYTES: usize = 40 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub pipeline: HairPipeline,
}

impl AppState {
    pub fn new(pipeline: HairPipeline) -> Self {
        Self {
            service_name: "hairlab-backend-core",
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            pipeline,
        }
    }
}

pub fn build_router_with_pipeline(pipeline: HairPipeline) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(
            "/api/hair/transform",
            post(crate::api::transform::transform_hair_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(pipeline))
}

pub async fn serve(addr: SocketAddr, pipeline: HairPipeline) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let app = build_router_with_pipeline(pipeline);
    info!(bind = %addr, "starting hairlab-backend-core HTTP surface");
    axum::serve(listener, app).await
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
        })),
    )
}

fn now_unix_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}
