mod files;
mod health;
mod resources;
mod tags;

pub use files::{MAX_UPLOAD_BYTES, serve_file, upload_file};
pub use health::{health_handler, metrics_handler};
pub use resources::{create_resource, delete_resource, get_resource, list_resources, update_resource};
pub use tags::{list_tags, rebuild_tags};

use axum::{
    extract::{FromRequestParts, Path, Query, Request, State},
    http::{HeaderMap, request::Parts},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AppError;
use crate::state::AppState;

pub const ADMIN_SECRET_QUERY_PARAM: &str = "adminSecret";

/// Product named by the `{product}` path segment, checked against the
/// configured product list.
#[derive(Debug, Clone)]
pub struct Tenant(pub String);

impl FromRequestParts<Arc<AppState>> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let invalid = || AppError::InvalidParam("Invalid product parameter".to_string());
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|_| invalid())?;

        match params.get("product") {
            Some(product) if state.products.contains(product) => Ok(Tenant(product.clone())),
            _ => Err(invalid()),
        }
    }
}

// Bearer token first, query parameter as fallback
fn is_admin(headers: &HeaderMap, query: &HashMap<String, String>, secret: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    bearer == Some(secret) || query.get(ADMIN_SECRET_QUERY_PARAM).map(String::as_str) == Some(secret)
}

/// Route layer for admin-only routes.
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let query = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    if !is_admin(request.headers(), &query, &state.config.admin_secret) {
        tracing::debug!(path = %request.uri().path(), "admin authentication failed");
        return Err(AppError::Unauthorized);
    }
    Ok(next.run(request).await)
}
