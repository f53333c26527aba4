use axum::{Json, extract::State};
use std::sync::Arc;

use super::Tenant;
use crate::error::AppError;
use crate::ledger::RebuildReport;
use crate::models::TagCounter;
use crate::state::AppState;
use crate::store::with_deadline;

pub async fn list_tags(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
) -> Result<Json<Vec<TagCounter>>, AppError> {
    let tags = with_deadline(state.deadline(), state.ledger.list(&tenant))
        .await
        .map_err(AppError::query("tags"))?;
    Ok(Json(tags))
}

// Recount from the live resources; no deadline, it walks the whole tenant
pub async fn rebuild_tags(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
) -> Result<Json<RebuildReport>, AppError> {
    let report = state
        .ledger
        .rebuild(&tenant)
        .await
        .map_err(AppError::mutation("tags"))?;
    Ok(Json(report))
}
