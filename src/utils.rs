use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Serialize a serde-backed enum into its string name (e.g. "Transformer").
pub fn serde_enum_name<T: Serialize>(val: &T) -> Option<String> {
    serde_json::to_value(val).ok()?.as_str().map(|s| s.to_string())
}

/// Free-text view of a scalar JSON value. Identifiers in the realtime store are
/// sometimes written as numbers, so those are stringified as well.
pub fn json_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Render a timestamp for terminal listings.
pub fn display_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}
