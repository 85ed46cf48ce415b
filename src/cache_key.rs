//! Cache key generation utilities
//!
//! Keys are `operation:canonical-json(params)`. Object keys are JSON-quoted
//! and sorted at every depth, so logically identical parameters always land
//! on the same slot whatever order the caller built them in.

use serde::Serialize;
use serde_json::Value;

/// Build the deterministic key for `operation` called with `params`.
pub fn query_key<P: Serialize + ?Sized>(operation: &str, params: &P) -> String {
    let value = serde_json::to_value(params).unwrap_or(Value::Null);
    format!("{}:{}", operation, canonical(&value))
}

fn canonical(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let parts: Vec<String> = entries
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), canonical(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
