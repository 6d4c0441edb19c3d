//! Constructors for protocol documents: parts, messages, artifacts, tasks.
//!
//! These produce the JSON shapes exchanged through the directory beyond the
//! frame envelope itself. Creation timestamps are ISO-8601 UTC.

use chrono::Utc;
use serde_json::{json, Map, Value};

/// Build a file part from a MIME type plus inline base64 data, a URI, or both.
pub fn file_part(mime_type: &str, data: Option<&str>, uri: Option<&str>) -> Value {
    let mut file = Map::new();
    file.insert("mime_type".to_string(), Value::String(mime_type.to_string()));
    if let Some(data) = data {
        file.insert("data".to_string(), Value::String(data.to_string()));
    }
    if let Some(uri) = uri {
        file.insert("uri".to_string(), Value::String(uri.to_string()));
    }
    json!({"type": "file", "file": file})
}

/// Build a structured data part.
pub fn data_part(data: Value) -> Value {
    json!({"type": "data", "data": data})
}

/// Build a message from a role (`user` or `agent`) and its parts.
pub fn message(role: &str, parts: Vec<Value>) -> Value {
    json!({
        "role": role,
        "parts": parts,
        "created_at": Utc::now().to_rfc3339(),
    })
}

/// Build an artifact from its id, type, and parts.
pub fn artifact(artifact_id: &str, artifact_type: &str, parts: Vec<Value>) -> Value {
    json!({
        "id": artifact_id,
        "type": artifact_type,
        "parts": parts,
        "created_at": Utc::now().to_rfc3339(),
    })
}

/// Build a freshly submitted task document from its messages and artifacts.
pub fn task(task_id: &str, messages: Vec<Value>, artifacts: Option<Vec<Value>>) -> Value {
    let now = Utc::now().to_rfc3339();
    json!({
        "id": task_id,
        "status": "submitted",
        "messages": messages,
        "artifacts": artifacts.unwrap_or_default(),
        "created_at": now,
        "updated_at": now,
    })
}
