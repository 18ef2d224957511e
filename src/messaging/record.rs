use crate::types::constants::fields;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical view of a notification or message document.
///
/// Relationship attributes arrive either as a plain id string or as an embedded document;
/// both normalize to the id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Option<String>,
    pub collection_id: Option<String>,
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub is_seen: bool,
    pub created_at: Option<String>,
    pub content: Option<String>,
}

impl DocumentRecord {
    pub fn from_payload(payload: &Value) -> Self {
        let Some(object) = payload.as_object() else {
            return Self::default();
        };

        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let reference = |primary: &str, fallback: &str| {
            object
                .get(primary)
                .and_then(extract_id)
                .or_else(|| object.get(fallback).and_then(extract_id))
        };

        Self {
            id: text(fields::ID),
            collection_id: text(fields::COLLECTION_ID),
            sender_id: reference(fields::SENDER_ID, fields::SENDER),
            receiver_id: reference(fields::RECEIVER_ID, fields::RECEIVER),
            is_seen: object
                .get(fields::IS_SEEN)
                .and_then(Value::as_bool)
                .unwrap_or(false),
            created_at: text(fields::CREATED_AT),
            content: text(fields::CONTENT),
        }
    }
}

/// Pull an id out of either `"u1"` or `{"$id": "u1", ...}`
pub fn extract_id(value: &Value) -> Option<String> {
    match value {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Object(object) => object
            .get(fields::ID)
            .or_else(|| object.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
