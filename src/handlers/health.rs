//! Health check and API root handlers

use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: i64,
}

pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

/// Registered resources and their collection URLs
pub async fn api_root() -> Json<Value> {
    Json(json!({
        "datasets": crate::routes::DATASETS_PATH,
    }))
}
