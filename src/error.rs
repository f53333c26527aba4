use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use crate::blob::BlobError;
use crate::models::ErrorResponse;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    InvalidParam(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("Admin authentication required")]
    Unauthorized,

    #[error("Resource not found")]
    NotFound,

    #[error("Failed to fetch {what}")]
    QueryFailed { what: &'static str, source: StoreError },

    #[error("Failed to save {what}")]
    MutationFailed { what: &'static str, source: StoreError },

    #[error("Failed to process stored data")]
    DataConversion(#[from] serde_json::Error),

    #[error("Failed to upload file")]
    UploadFailed(#[from] BlobError),

    #[error("Failed to read file")]
    FileReadFailed(#[source] BlobError),

    #[error("Resource was modified concurrently, retry the request")]
    Conflict,
}

impl AppError {
    pub fn query(what: &'static str) -> impl FnOnce(StoreError) -> AppError {
        move |source| AppError::QueryFailed { what, source }
    }

    pub fn mutation(what: &'static str) -> impl FnOnce(StoreError) -> AppError {
        move |source| AppError::MutationFailed { what, source }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::InvalidParam(_) => (StatusCode::BAD_REQUEST, "invalid_param"),
            AppError::InvalidPayload(_) => (StatusCode::BAD_REQUEST, "invalid_payload"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            AppError::Conflict => (StatusCode::CONFLICT, "conflict"),
            AppError::QueryFailed { source, .. } | AppError::MutationFailed { source, .. }
                if is_unavailable(source) =>
            {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
            AppError::QueryFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "query_failed"),
            AppError::MutationFailed { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "mutation_failed"),
            AppError::DataConversion(_) => (StatusCode::INTERNAL_SERVER_ERROR, "data_conversion_failed"),
            AppError::UploadFailed(BlobError::Unavailable(_)) | AppError::FileReadFailed(BlobError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
            AppError::UploadFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "upload_failed"),
            AppError::FileReadFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "file_read_failed"),
        }
    }
}

fn is_unavailable(e: &StoreError) -> bool {
    matches!(e, StoreError::Unavailable(_) | StoreError::DeadlineExceeded)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            match &self {
                AppError::QueryFailed { source, .. } | AppError::MutationFailed { source, .. } => {
                    error!(error = %source, "{}", self)
                }
                other => error!(error = ?other, "request failed"),
            }
        }

        let body = ErrorResponse {
            error: code.to_string(),
            message: Some(self.to_string()),
        };
        (status, Json(body)).into_response()
    }
}
