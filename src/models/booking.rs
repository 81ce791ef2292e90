use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::document::{coerce_price, Document};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    /// Calendar day, `YYYY-MM-DD`.
    pub date: String,
    /// `HH:MM`, 24h.
    pub time: String,
    pub customer_name: String,
    pub service_name: String,
    pub price: f64,
    pub duration: Option<u32>,
    pub status: BookingStatus,
    pub customer_id: String,
    pub service_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
    Rejected,
    Upcoming,
    Unknown,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Accepted => "accepted",
            BookingStatus::InProgress => "in-progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Rejected => "rejected",
            BookingStatus::Upcoming => "upcoming",
            BookingStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => BookingStatus::Pending,
            "accepted" => BookingStatus::Accepted,
            "in-progress" => BookingStatus::InProgress,
            "completed" => BookingStatus::Completed,
            "cancelled" => BookingStatus::Cancelled,
            "rejected" => BookingStatus::Rejected,
            "upcoming" => BookingStatus::Upcoming,
            _ => BookingStatus::Unknown,
        }
    }
}

impl Booking {
    /// Bookings are read-only projections; ingestion never fails; missing
    /// fields fall back to empty values and price is coerced to a number.
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            date: doc.string_or_default("date"),
            time: doc.string_or_default("time"),
            customer_name: doc.string_or_default("customerName"),
            service_name: doc.string_or_default("serviceName"),
            price: coerce_price(doc.field("price")),
            duration: doc
                .field("duration")
                .and_then(|v| v.as_u64())
                .and_then(|d| u32::try_from(d).ok()),
            status: BookingStatus::parse(doc.str_field("status").unwrap_or_default()),
            customer_id: doc.string_or_default("customerId"),
            service_id: doc.string_or_default("serviceId"),
        }
    }

    pub fn is_on(&self, day: NaiveDate) -> bool {
        self.date == day.format("%Y-%m-%d").to_string()
    }

    /// Minutes since midnight parsed from `HH:MM`; `None` when the time is
    /// not a valid clock time.
    pub fn minutes_of_day(&self) -> Option<u32> {
        minutes_of_day(&self.time)
    }
}

pub fn minutes_of_day(time: &str) -> Option<u32> {
    let (hours, minutes) = time.trim().split_once(':')?;
    let hours: u32 = hours.parse().ok().filter(|h| *h < 24)?;
    let minutes: u32 = minutes.parse().ok().filter(|m| *m < 60)?;
    Some(hours * 60 + minutes)
}
