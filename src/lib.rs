//! Catalog service for tagged learning resources.
//!
//! Resources (videos, PDFs, articles) live in per-product collections of a
//! document store. Every create, update and delete feeds the tag usage
//! [`ledger`], and every request passes the per-client [`rate_limit`] gate
//! before reaching a handler.

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, patch, post},
};
use std::sync::Arc;

pub mod blob;
pub mod config;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod metrics;
pub mod models;
pub mod pagination;
pub mod rate_limit;
pub mod state;
pub mod store;
pub mod tags;

use handlers::{
    MAX_UPLOAD_BYTES, create_resource, delete_resource, get_resource, health_handler, list_resources, list_tags,
    metrics_handler, rebuild_tags, require_admin, serve_file, update_resource, upload_file,
};
use rate_limit::rate_limit;
use state::AppState;

// creating the router with routes; the rate limiter wraps all of them
pub fn app(state: Arc<AppState>) -> Router {
    let admin = middleware::from_fn_with_state(state.clone(), require_admin);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/api/{product}/resources",
            get(list_resources).merge(post(create_resource).route_layer(admin.clone())),
        )
        .route(
            "/api/{product}/resources/{id}",
            get(get_resource).merge(
                patch(update_resource)
                    .delete(delete_resource)
                    .route_layer(admin.clone()),
            ),
        )
        .route("/api/{product}/tags", get(list_tags))
        .route(
            "/api/{product}/tags/rebuild",
            post(rebuild_tags).route_layer(admin.clone()),
        )
        .route(
            "/api/{product}/files",
            post(upload_file)
                .route_layer(admin)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/files/{*key}", get(serve_file))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}
