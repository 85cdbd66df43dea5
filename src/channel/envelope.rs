//! Wire envelope helpers.
//!
//! Outbound: JSON strings travel as their raw text, every other value as
//! compact JSON. A correlated request carries its id under
//! [`FIELD_REQUEST_UUID`].
//!
//! Inbound: frames are parsed as JSON when possible and passed on as a raw
//! string otherwise. Replies whose id was looked up are marked with
//! [`FIELD_REQUEST_UUID_HANDLED`].

use serde_json::Value;

use crate::constants::{FIELD_REQUEST_UUID, FIELD_REQUEST_UUID_HANDLED};

/// Serialize an outbound message.
#[must_use]
pub fn encode(message: &Value) -> String {
    match message {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Parse an inbound frame, falling back to the raw text.
#[must_use]
pub fn decode(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Attach `id` to an object message. Returns `false` for non-objects.
pub fn tag_request(message: &mut Value, id: &str) -> bool {
    match message.as_object_mut() {
        Some(object) => {
            object.insert(
                FIELD_REQUEST_UUID.to_string(),
                Value::String(id.to_string()),
            );
            true
        }
        None => false,
    }
}

/// Correlation id carried by an inbound payload, as a pool key.
///
/// Any truthy value counts: non-empty strings, non-zero numbers, `true`,
/// arrays and objects. Non-string ids are keyed by their JSON text, so they
/// get marked handled but never match a generated uuid.
#[must_use]
pub fn request_id(payload: &Value) -> Option<String> {
    match payload.get(FIELD_REQUEST_UUID)? {
        Value::Null | Value::Bool(false) => None,
        Value::String(id) => (!id.is_empty()).then(|| id.clone()),
        Value::Number(n) => (n.as_f64() != Some(0.0)).then(|| n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Flag an inbound payload as correlated.
pub fn mark_handled(payload: &mut Value) {
    if let Some(object) = payload.as_object_mut() {
        object.insert(FIELD_REQUEST_UUID_HANDLED.to_string(), Value::Bool(true));
    }
}
