use axum::{Json, response::IntoResponse};

use crate::metrics;

pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn metrics_handler() -> impl IntoResponse {
    metrics::render()
}
