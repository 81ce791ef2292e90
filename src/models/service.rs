use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{coerce_price, Document};

/// How a service points at its category. Older records carry the bare
/// category name; newer ones carry an `{id, name}` object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum CategoryRef {
    ById(String),
    ByName(String),
}

impl CategoryRef {
    /// Objects resolve by `id` only; strings resolve by name; anything else
    /// points nowhere.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => map
                .get("id")
                .and_then(Value::as_str)
                .map(|id| CategoryRef::ById(id.to_string())),
            Value::String(name) => Some(CategoryRef::ByName(name.clone())),
            _ => None,
        }
    }

    pub fn resolves_to(&self, category_id: &str, category_name: &str) -> bool {
        match self {
            CategoryRef::ById(id) => id == category_id,
            CategoryRef::ByName(name) => name == category_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    pub name: String,
    pub is_active: bool,
    pub category: Option<CategoryRef>,
    pub price: f64,
    pub duration: Option<u32>,
}

impl Service {
    pub fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            name: doc.string_or_default("name"),
            is_active: doc
                .field("isActive")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            category: doc.field("category").and_then(CategoryRef::from_value),
            price: coerce_price(doc.field("price")),
            duration: doc
                .field("duration")
                .and_then(Value::as_u64)
                .and_then(|d| u32::try_from(d).ok()),
        }
    }
}
