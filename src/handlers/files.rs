use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use super::Tenant;
use crate::blob::object_key;
use crate::error::AppError;
use crate::models::UploadResponse;
use crate::state::AppState;

pub const MAX_UPLOAD_BYTES: usize = 100 << 20; // 100MB

const UPLOAD_KINDS: [&str; 3] = ["video", "pdf", "image"];

#[derive(Deserialize)]
pub struct UploadParams {
    pub kind: String,
    pub name: String,
}

// Raw body upload; the returned url goes into a resource's url or thumbnailUrl
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    if !UPLOAD_KINDS.contains(&params.kind.as_str()) {
        return Err(AppError::InvalidPayload(
            "Kind must be 'video', 'pdf', or 'image'".to_string(),
        ));
    }
    if body.is_empty() {
        return Err(AppError::InvalidPayload("File is empty".to_string()));
    }

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let key = object_key(&tenant, &params.kind, &params.name, &body, chrono::Utc::now().timestamp())
        .map_err(|_| AppError::InvalidPayload("Invalid file name".to_string()))?;

    let size = body.len();
    state.blobs.put(&key, &content_type, body).await?;
    info!(%tenant, %key, size, "file uploaded");

    let url = state.blobs.public_url(&key);
    Ok((StatusCode::CREATED, Json(UploadResponse { key, url })))
}

pub async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let blob = state
        .blobs
        .get(&key)
        .await
        .map_err(AppError::FileReadFailed)?
        .ok_or(AppError::NotFound)?;
    Ok(([(CONTENT_TYPE, blob.content_type)], blob.bytes).into_response())
}
