pub mod dashboard;
pub mod documents;
pub mod health;

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::Router;

use crate::errors::AppError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/dashboard", get(dashboard::get_snapshot))
        .route("/api/dashboard/stats", get(dashboard::get_stats))
        .route("/api/dashboard/categories", get(dashboard::get_categories))
        .route("/api/dashboard/today", get(dashboard::get_today_bookings))
        .route("/api/dashboard/refresh", post(dashboard::refresh))
        .route(
            "/api/dashboard/category-edit-target",
            post(dashboard::set_category_edit_target),
        )
        .route("/api/dashboard/events", get(dashboard::events_stream))
        .route(
            "/api/documents/:collection/:id",
            get(documents::get_document)
                .put(documents::put_document)
                .delete(documents::delete_document),
        )
        .with_state(state)
}

pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), AppError> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if token != expected_token {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}
