use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::Document;
use crate::errors::FetchError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Computed locally from the services collection; never stored upstream.
    pub service_count: usize,
}

impl Category {
    pub const COLLECTION: &'static str = "categories";

    /// A category without a name cannot be matched by legacy service
    /// references, so it is rejected rather than defaulted.
    pub fn from_document(doc: &Document) -> Result<Self, FetchError> {
        let name = doc
            .str_field("name")
            .ok_or_else(|| FetchError::Malformed {
                collection: Self::COLLECTION.to_string(),
                id: doc.id.clone(),
                reason: "missing name".to_string(),
            })?
            .to_string();

        Ok(Self {
            id: doc.id.clone(),
            name,
            is_active: doc
                .field("isActive")
                .and_then(Value::as_bool)
                .unwrap_or(true),
            created_at: doc.field("createdAt").and_then(normalize_timestamp),
            updated_at: doc.field("updatedAt").and_then(normalize_timestamp),
            service_count: 0,
        })
    }
}

/// Accepts the encodings timestamps arrive in: `{seconds, nanoseconds}`
/// objects (with or without leading underscores), RFC 3339 strings, and
/// epoch milliseconds.
pub fn normalize_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0);
            Utc.timestamp_opt(seconds, nanos).single()
        }
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}
