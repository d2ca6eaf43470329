//! # Error Classifier
//!
//! Sorts backend failures into transport faults and domain faults.
//!
//! | Source                          | Kind       | Session        |
//! |---------------------------------|------------|----------------|
//! | policy / content-filter tag     | policy     | continues      |
//! | validation tag, field errors    | validation | continues      |
//! | network failure, 5xx, 408, 429  | transport  | see below      |
//! | anything else                   | unknown    | continues      |
//!
//! Transport faults from the channel end the session. Transport faults from
//! an approval call only revert the approval so the user can retry.

use serde_json::Value;

use crate::core::types::{ErrorKind, ErrorRecord};

const POLICY_TAGS: &[&str] = &[
    "content_filter",
    "content_policy_violation",
    "policy_violation",
    "responsible_ai_policy_violation",
    "rai_violation",
];

const VALIDATION_TAGS: &[&str] = &[
    "validation_error",
    "request_validation_error",
    "invalid_request",
    "invalid_request_error",
];

const TRANSPORT_TAGS: &[&str] = &["transport_error", "connection_error", "timeout"];

/// Fields that may carry a tag, in lookup order.
const TAG_FIELDS: &[&[&str]] = &[&["error", "code"], &["error", "type"], &["code"], &["type"], &["kind"]];

/// Fields that may carry a human-readable message, in lookup order.
const DETAIL_FIELDS: &[&[&str]] = &[&["error", "message"], &["message"], &["detail"], &["content"]];

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

fn tag_kind(tag: &str) -> Option<ErrorKind> {
    let tag = tag.to_ascii_lowercase();
    if POLICY_TAGS.contains(&tag.as_str()) {
        Some(ErrorKind::Policy)
    } else if VALIDATION_TAGS.contains(&tag.as_str()) {
        Some(ErrorKind::Validation)
    } else if TRANSPORT_TAGS.contains(&tag.as_str()) {
        Some(ErrorKind::Transport)
    } else {
        None
    }
}

/// A `detail` list of `{loc, msg}` objects is a field-validation failure.
fn field_errors(value: &Value) -> Option<String> {
    let items = value.get("detail")?.as_array()?;
    let messages: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("msg").and_then(Value::as_str))
        .collect();
    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}

fn detail_of(value: &Value, raw: &str) -> String {
    DETAIL_FIELDS
        .iter()
        .filter_map(|path| lookup(value, path))
        .find_map(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| raw.to_string())
}

/// Structured parse of a failure payload. Returns `None` when the payload
/// is not JSON or carries no tag we recognize.
fn classify_structured(payload: &str) -> Option<ErrorRecord> {
    let value: Value = serde_json::from_str(payload).ok()?;

    if let Some(detail) = field_errors(&value) {
        return Some(ErrorRecord::new(ErrorKind::Validation, detail));
    }

    let kind = TAG_FIELDS
        .iter()
        .filter_map(|path| lookup(&value, path).and_then(Value::as_str))
        .find_map(tag_kind)?;
    Some(ErrorRecord::new(kind, detail_of(&value, payload)))
}

/// Classify a failure payload that arrived without an HTTP status, such as
/// the content of an `error` stream event.
pub fn classify_payload(payload: &str) -> ErrorRecord {
    classify_structured(payload).unwrap_or_else(|| {
        let detail = serde_json::from_str::<Value>(payload)
            .map(|v| detail_of(&v, payload))
            .unwrap_or_else(|_| payload.to_string());
        ErrorRecord::new(ErrorKind::Unknown, detail)
    })
}

/// Classify a non-2xx HTTP response.
///
/// A recognized domain tag in the body wins over the status code.
pub fn classify_http(status: u16, body: &str) -> ErrorRecord {
    if let Some(record) = classify_structured(body) {
        return record;
    }
    let detail = if body.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", classify_payload(body).detail)
    };
    let kind = if status >= 500 || status == 408 || status == 429 {
        ErrorKind::Transport
    } else {
        ErrorKind::Unknown
    };
    ErrorRecord::new(kind, detail)
}

/// A request that never got a response.
pub fn classify_network(err: &reqwest::Error) -> ErrorRecord {
    ErrorRecord::transport(err.to_string())
}
