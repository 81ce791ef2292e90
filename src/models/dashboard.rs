use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Booking, Category};
use crate::sync::SourceKey;

/// Derived counters shown on the dashboard cards. Recomputed, never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub total_bookings: usize,
    pub pending_bookings: usize,
    pub today_revenue: f64,
    pub active_services: usize,
}

/// Everything the presentation layer reads, published as one immutable value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSnapshot {
    pub stats: DashboardStats,
    pub categories: Vec<Category>,
    pub today_bookings: Vec<Booking>,
    pub loading: bool,
    pub refreshing: bool,
    pub online: bool,
    pub category_edit_target: Option<Category>,
    pub stale_sources: Vec<SourceKey>,
    pub last_error: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}
