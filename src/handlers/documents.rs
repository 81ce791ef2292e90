//! Direct document writes, standing in for the customer-facing flow that
//! normally creates and updates records.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;

use super::check_auth;
use crate::errors::AppError;
use crate::models::Document;
use crate::state::AppState;
use crate::sync::{BOOKINGS, CATEGORIES, SERVICES};

fn check_collection(collection: &str) -> Result<(), AppError> {
    match collection {
        BOOKINGS | SERVICES | CATEGORIES => Ok(()),
        other => Err(AppError::BadRequest(format!("unknown collection: {other}"))),
    }
}

// GET /api/documents/:collection/:id
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<Document>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    check_collection(&collection)?;

    state
        .store
        .get(&collection, &id)?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{collection}/{id}")))
}

// PUT /api/documents/:collection/:id
pub async fn put_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
    Json(data): Json<serde_json::Value>,
) -> Result<Json<Document>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    check_collection(&collection)?;

    if !data.is_object() {
        return Err(AppError::BadRequest("document must be a JSON object".to_string()));
    }

    let doc = Document::new(id, data);
    state.store.put(&collection, &doc)?;
    tracing::info!(%collection, id = %doc.id, "document written");

    Ok(Json(doc))
}

// DELETE /api/documents/:collection/:id
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path((collection, id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    check_collection(&collection)?;

    if state.store.delete(&collection, &id)? {
        tracing::info!(%collection, %id, "document deleted");
        Ok(Json(serde_json::json!({"ok": true})))
    } else {
        Err(AppError::NotFound(format!("{collection}/{id}")))
    }
}
