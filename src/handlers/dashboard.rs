use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;
use tokio_stream::StreamExt;

use super::check_auth;
use crate::errors::AppError;
use crate::models::{Booking, Category, DashboardSnapshot, DashboardStats};
use crate::state::AppState;

// GET /api/dashboard
pub async fn get_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DashboardSnapshot>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.dashboard.snapshot().as_ref().clone()))
}

// GET /api/dashboard/stats
pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DashboardStats>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.dashboard.stats()))
}

// GET /api/dashboard/categories
pub async fn get_categories(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Category>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.dashboard.categories()))
}

// GET /api/dashboard/today
pub async fn get_today_bookings(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Booking>>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;
    Ok(Json(state.dashboard.today_bookings()))
}

// POST /api/dashboard/refresh
#[derive(Serialize)]
pub struct RefreshResponse {
    ok: bool,
    stats: DashboardStats,
}

pub async fn refresh(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    state.dashboard.refresh().await?;

    Ok(Json(RefreshResponse {
        ok: true,
        stats: state.dashboard.stats(),
    }))
}

// POST /api/dashboard/category-edit-target
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditTargetRequest {
    pub category_id: Option<String>,
}

pub async fn set_category_edit_target(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<EditTargetRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    check_auth(&headers, &state.config.admin_token)?;

    let target = match body.category_id {
        Some(id) => Some(
            state
                .dashboard
                .categories()
                .into_iter()
                .find(|c| c.id == id)
                .ok_or_else(|| AppError::NotFound(format!("category {id}")))?,
        ),
        None => None,
    };

    state.dashboard.set_category_edit_target(target)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

// GET /api/dashboard/events (SSE stream of snapshots)
#[derive(Deserialize)]
pub struct SseQuery {
    pub token: Option<String>,
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SseQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Auth via query param (EventSource can't set headers)
    let token = query.token.as_deref().unwrap_or("");
    if token != state.config.admin_token {
        return Err(AppError::Unauthorized);
    }

    // Emits the current snapshot first, then every replacement.
    let snapshots = WatchStream::new(state.dashboard.subscribe()).map(|snapshot| {
        let data = serde_json::to_string(snapshot.as_ref()).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(data).event("snapshot"))
    });

    let keepalive_stream = tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    Ok(Sse::new(StreamExt::merge(snapshots, keepalive_stream)))
}
