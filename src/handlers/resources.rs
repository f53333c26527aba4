use axum::{
    Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use super::Tenant;
use crate::error::AppError;
use crate::ledger::resources_collection;
use crate::models::{
    CreateResourceRequest, ListParams, PaginatedResponse, Resource, ResourceRecord, ResourceType,
    UpdateResourceRequest,
};
use crate::pagination::{PageRequest, paginate};
use crate::state::AppState;
use crate::store::{
    Direction, Document, Query as StoreQuery, StoreError, TxWrite, run_transaction, with_deadline,
};
use crate::tags::{normalize_tags, parse_tag_list};

fn decode_resource(doc: Document) -> Result<Resource, serde_json::Error> {
    Ok(Resource {
        id: doc.id,
        record: serde_json::from_value(doc.data)?,
    })
}

fn matches_search(resource: &Resource, needle: Option<&str>) -> bool {
    match needle {
        None => true,
        Some(needle) => {
            resource.record.title.to_lowercase().contains(needle)
                || resource.record.description.to_lowercase().contains(needle)
        }
    }
}

fn invalid_type() -> AppError {
    AppError::InvalidPayload("Type must be 'video', 'pdf', or 'article'".to_string())
}

/// GET /api/{product}/resources
///
/// `type` and `tags` narrow the store query; `search` is matched on title and
/// description after the fetch, which is why a filtered page can come back
/// shorter than `limit`.
pub async fn list_resources(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Query(params): Query<ListParams>,
) -> Result<Json<PaginatedResponse>, AppError> {
    let page = PageRequest::parse(params.cursor.as_deref(), params.limit.as_deref());

    let mut query = StoreQuery::new(resources_collection(&tenant)).order_by("createdAt", Direction::Desc);
    // unknown types are ignored rather than rejected
    if let Some(kind) = params.resource_type.as_deref().and_then(ResourceType::parse) {
        query = query.where_eq("type", kind.as_str());
    }
    if let Some(raw) = params.tags.as_deref() {
        let tags = parse_tag_list(raw);
        if !tags.is_empty() {
            query = query.where_array_contains_any("tags", tags.into_iter().map(Value::from).collect());
        }
    }
    let query = query.offset(page.offset).limit(page.fetch_limit());

    let docs = with_deadline(state.deadline(), state.store.query(query))
        .await
        .map_err(AppError::query("resources"))?;

    // undecodable documents still count towards the raw fetch size
    let candidates: Vec<Option<Resource>> = docs
        .into_iter()
        .map(|doc| {
            let id = doc.id.clone();
            decode_resource(doc)
                .map_err(|e| warn!(%tenant, %id, error = %e, "skipping undecodable resource"))
                .ok()
        })
        .collect();

    let needle = params
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());
    let result = paginate(&page, candidates, |candidate| {
        candidate
            .as_ref()
            .is_some_and(|r| matches_search(r, needle.as_deref()))
    });

    Ok(Json(PaginatedResponse {
        data: result.items.into_iter().flatten().collect(),
        next_cursor: result.next_cursor,
        has_more: result.has_more,
    }))
}

/// GET /api/{product}/resources/{id}
pub async fn get_resource(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path((_, id)): Path<(String, String)>,
) -> Result<Json<Resource>, AppError> {
    let doc = with_deadline(state.deadline(), state.store.get(&resources_collection(&tenant), &id))
        .await
        .map_err(AppError::query("resource"))?
        .ok_or(AppError::NotFound)?;
    Ok(Json(decode_resource(doc)?))
}

/// POST /api/{product}/resources
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    payload: Result<Json<CreateResourceRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Resource>), AppError> {
    let Json(payload) = payload.map_err(|e| AppError::InvalidPayload(e.body_text()))?;
    let deadline = state.deadline();

    let title = payload.title.trim();
    let description = payload.description.trim();
    if title.is_empty() || description.is_empty() || payload.resource_type.is_empty() {
        return Err(AppError::InvalidPayload(
            "Title, description, and type are required".to_string(),
        ));
    }
    let resource_type = ResourceType::parse(&payload.resource_type).ok_or_else(invalid_type)?;
    if payload.url.trim().is_empty() {
        return Err(AppError::InvalidPayload(format!(
            "Url must be provided for '{}'",
            resource_type.as_str()
        )));
    }

    let now = Utc::now();
    let record = ResourceRecord {
        title: title.to_string(),
        description: description.to_string(),
        resource_type,
        url: payload.url.trim().to_string(),
        thumbnail_url: payload.thumbnail_url.filter(|u| !u.trim().is_empty()),
        tags: normalize_tags(&payload.tags),
        created_at: now,
        updated_at: now,
    };

    let body = serde_json::to_value(&record)?;
    let id = with_deadline(deadline, state.store.add(&resources_collection(&tenant), body))
        .await
        .map_err(AppError::mutation("resource"))?;
    info!(%tenant, %id, "resource created");

    // the resource is durable from here on; the ledger can only log
    state.ledger.apply(&tenant, &record.tags, 1, deadline).await;

    Ok((StatusCode::CREATED, Json(Resource { id, record })))
}

/// Outcome of the read-merge-write over one resource document.
enum Patched {
    Missing,
    TypeChanged,
    Saved {
        existing: ResourceRecord,
        updated: ResourceRecord,
    },
}

// Field changes of a PATCH, validated before any document is read
struct ResourcePatch {
    title: Option<String>,
    description: Option<String>,
    resource_type: Option<ResourceType>,
    url: Option<String>,
    thumbnail_url: Option<Option<String>>,
    tags: Option<Vec<String>>,
}

impl ResourcePatch {
    fn parse(payload: UpdateResourceRequest) -> Result<Self, AppError> {
        let non_empty = |value: Option<String>, message: &str| match value {
            Some(v) if v.trim().is_empty() => Err(AppError::InvalidPayload(message.to_string())),
            other => Ok(other.map(|v| v.trim().to_string())),
        };

        Ok(Self {
            title: non_empty(payload.title, "Title cannot be empty")?,
            description: non_empty(payload.description, "Description cannot be empty")?,
            resource_type: payload
                .resource_type
                .map(|kind| ResourceType::parse(&kind).ok_or_else(invalid_type))
                .transpose()?,
            url: non_empty(payload.url, "Url cannot be empty")?,
            thumbnail_url: payload
                .thumbnail_url
                .map(|u| Some(u.trim().to_string()).filter(|u| !u.is_empty())),
            tags: payload.tags.map(|tags| normalize_tags(&tags)),
        })
    }

    fn merge(&self, existing: &ResourceRecord, now: DateTime<Utc>) -> ResourceRecord {
        let mut updated = existing.clone();
        if let Some(title) = &self.title {
            updated.title = title.clone();
        }
        if let Some(description) = &self.description {
            updated.description = description.clone();
        }
        if let Some(url) = &self.url {
            updated.url = url.clone();
        }
        if let Some(thumbnail_url) = &self.thumbnail_url {
            updated.thumbnail_url = thumbnail_url.clone();
        }
        if let Some(tags) = &self.tags {
            updated.tags = tags.clone();
        }
        updated.updated_at = now;
        updated
    }
}

/// PATCH /api/{product}/resources/{id}
///
/// Absent fields are left alone. The type can be restated but not changed.
/// The write only commits over the version the merge was computed from, so a
/// resource deleted in the meantime stays deleted.
pub async fn update_resource(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path((_, id)): Path<(String, String)>,
    payload: Result<Json<UpdateResourceRequest>, JsonRejection>,
) -> Result<Json<Resource>, AppError> {
    let Json(payload) = payload.map_err(|e| AppError::InvalidPayload(e.body_text()))?;
    let patch = ResourcePatch::parse(payload)?;
    let deadline = state.deadline();
    let collection = resources_collection(&tenant);
    let now = Utc::now();

    let tx = run_transaction(state.store.as_ref(), &collection, &id, state.tx_policy, |doc| {
        let Some(doc) = doc else {
            return Ok((TxWrite::None, Patched::Missing));
        };
        let existing: ResourceRecord = doc.decode()?;
        if patch.resource_type.is_some_and(|kind| kind != existing.resource_type) {
            return Ok((TxWrite::None, Patched::TypeChanged));
        }
        let updated = patch.merge(&existing, now);
        let body = serde_json::to_value(&updated)?;
        Ok((TxWrite::Set(body), Patched::Saved { existing, updated }))
    });
    let outcome = match with_deadline(deadline, tx).await {
        Ok(outcome) => outcome,
        Err(StoreError::RetriesExhausted { attempts }) => {
            warn!(%tenant, %id, attempts, "resource update kept conflicting");
            return Err(AppError::Conflict);
        }
        Err(e) => return Err(AppError::mutation("resource")(e)),
    };

    let (existing, updated) = match outcome {
        Patched::Missing => return Err(AppError::NotFound),
        Patched::TypeChanged => {
            return Err(AppError::InvalidPayload("Resource type cannot be changed".to_string()));
        }
        Patched::Saved { existing, updated } => (existing, updated),
    };
    info!(%tenant, %id, "resource updated");

    // diff against the version the commit replaced
    if patch.tags.is_some() && (!existing.tags.is_empty() || !updated.tags.is_empty()) {
        state
            .ledger
            .replace(&tenant, &existing.tags, &updated.tags, deadline)
            .await;
    }

    // stored files that are no longer referenced
    let mut orphaned = Vec::new();
    if updated.url != existing.url {
        orphaned.push(existing.url.clone());
    }
    if updated.thumbnail_url != existing.thumbnail_url {
        orphaned.extend(existing.thumbnail_url.clone());
    }
    remove_stored_files(&state, &orphaned).await;

    Ok(Json(Resource { id, record: updated }))
}

/// DELETE /api/{product}/resources/{id}
pub async fn delete_resource(
    State(state): State<Arc<AppState>>,
    Tenant(tenant): Tenant,
    Path((_, id)): Path<(String, String)>,
) -> Result<Json<Value>, AppError> {
    let deadline = state.deadline();
    let collection = resources_collection(&tenant);

    let doc = with_deadline(deadline, state.store.get(&collection, &id))
        .await
        .map_err(AppError::query("resource"))?
        .ok_or(AppError::NotFound)?;
    let record: ResourceRecord = serde_json::from_value(doc.data)?;

    let removed = with_deadline(deadline, state.store.delete(&collection, &id))
        .await
        .map_err(AppError::mutation("resource"))?;
    if !removed {
        // a concurrent delete won; it owns the ledger update
        return Err(AppError::NotFound);
    }
    info!(%tenant, %id, "resource deleted");

    state.ledger.apply(&tenant, &record.tags, -1, deadline).await;

    let files: Vec<String> = std::iter::once(record.url).chain(record.thumbnail_url).collect();
    remove_stored_files(&state, &files).await;

    Ok(Json(serde_json::json!({ "message": "Resource deleted successfully" })))
}

// Best effort: links that point elsewhere are skipped, failures only logged
async fn remove_stored_files(state: &AppState, urls: &[String]) {
    for url in urls {
        let Some(key) = state.blobs.key_from_url(url) else {
            continue;
        };
        if let Err(e) = state.blobs.delete(&key).await {
            warn!(%key, error = %e, "failed to delete stored file");
        }
    }
}
