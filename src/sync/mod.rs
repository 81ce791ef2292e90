//! Live data plumbing behind the dashboard: stream subscriptions, per-source
//! slots, the pure aggregator, category enrichment and the coordinator that
//! ties them together.

pub mod aggregate;
pub mod coordinator;
pub mod enrichment;
pub mod slot;
pub mod subscriptions;

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::Filter;

pub const BOOKINGS: &str = "bookings";
pub const SERVICES: &str = "services";
pub const CATEGORIES: &str = "categories";

/// A logical data stream feeding the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKey {
    AllBookings,
    TodayBookings,
    ActiveServices,
    /// Unfiltered services; only used to notice service edits that affect
    /// category counts.
    AllServices,
    Categories,
}

impl SourceKey {
    pub const ALL: [SourceKey; 5] = [
        SourceKey::AllBookings,
        SourceKey::TodayBookings,
        SourceKey::ActiveServices,
        SourceKey::AllServices,
        SourceKey::Categories,
    ];

    /// Sources fetched eagerly to establish a baseline on startup.
    pub const BASELINE: [SourceKey; 3] = [
        SourceKey::AllBookings,
        SourceKey::ActiveServices,
        SourceKey::Categories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKey::AllBookings => "all-bookings",
            SourceKey::TodayBookings => "today-bookings",
            SourceKey::ActiveServices => "active-services",
            SourceKey::AllServices => "all-services",
            SourceKey::Categories => "categories",
        }
    }

    pub fn query(&self, today: NaiveDate) -> SourceQuery {
        match self {
            SourceKey::AllBookings => SourceQuery::new(BOOKINGS, vec![]),
            SourceKey::TodayBookings => SourceQuery::new(
                BOOKINGS,
                vec![Filter::equals("date", today.format("%Y-%m-%d").to_string())],
            ),
            SourceKey::ActiveServices => {
                SourceQuery::new(SERVICES, vec![Filter::equals("isActive", true)])
            }
            SourceKey::AllServices => SourceQuery::new(SERVICES, vec![]),
            SourceKey::Categories => SourceQuery::new(CATEGORIES, vec![]),
        }
    }
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection plus equality filters for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceQuery {
    pub collection: &'static str,
    pub filters: Vec<Filter>,
}

impl SourceQuery {
    pub fn new(collection: &'static str, filters: Vec<Filter>) -> Self {
        Self {
            collection,
            filters,
        }
    }
}
