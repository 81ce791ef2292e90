use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::sync::SourceKey;

/// A one-shot read or subscription setup against the document store failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("store error: {0}")]
    Store(String),

    #[error("malformed document {id} in {collection}: {reason}")]
    Malformed {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("store unavailable")]
    Unavailable,
}

impl From<rusqlite::Error> for FetchError {
    fn from(e: rusqlite::Error) -> Self {
        FetchError::Store(e.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Store(format!("invalid document json: {e}"))
    }
}

/// Service-count computation for categories failed.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnrichmentError {
    #[error("services fetch failed: {0}")]
    Services(FetchError),

    #[error("category ingestion failed: {0}")]
    Categories(FetchError),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DashboardError {
    #[error("refresh failed for {}", format_sources(.failed))]
    Refresh { failed: Vec<SourceKey> },

    #[error("source {0} already has a live subscription")]
    AlreadySubscribed(SourceKey),

    #[error("subscription setup failed for {key}: {error}")]
    Subscribe {
        key: SourceKey,
        #[source]
        error: FetchError,
    },

    #[error("dashboard has been shut down")]
    ShutDown,
}

fn format_sources(sources: &[SourceKey]) -> String {
    sources
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("store error: {0}")]
    Store(#[from] FetchError),

    #[error("{0}")]
    Dashboard(#[from] DashboardError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized")]
    Unauthorized,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Dashboard(DashboardError::Refresh { .. }) => StatusCode::BAD_GATEWAY,
            AppError::Dashboard(DashboardError::ShutDown) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Dashboard(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
