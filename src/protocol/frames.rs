//! Frame definitions for the WebSocket channel.
//!
//! Recognized frame types: `ping`, `pong`, `task`, `task_update`, `message`.
//! Decoding goes through [`Frame::decode`], which distinguishes three
//! outcomes: a recognized frame, an unrecognized-but-well-formed frame
//! (`Ok(None)`, to be logged and dropped), and malformed JSON or a missing
//! discriminator (an error, equally logged and dropped by the reader).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AgentError;

/// One JSON frame on the agent ↔ directory channel, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Liveness probe; either side may send one.
    Ping,
    /// Reply to a `ping`.
    Pong,
    /// A task dispatched to this agent.
    Task {
        task_id: String,
        #[serde(default)]
        content: TaskContent,
    },
    /// The single, correlated answer to an inbound `task`.
    TaskUpdate {
        task_id: String,
        status: UpdateStatus,
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<Value>,
    },
    /// Application-level message between agents, routed by the directory.
    Message {
        id: String,
        from: String,
        to: String,
        #[serde(default)]
        content: Value,
    },
}

/// Payload of an inbound `task` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskContent {
    /// Free-form primary input, usually text.
    #[serde(default)]
    pub input: Value,
    /// Caller-supplied context (user id, session id, ...).
    #[serde(default)]
    pub context: Map<String, Value>,
    /// Arguments for the named skill, validated against its input schema.
    #[serde(default = "empty_object")]
    pub parameters: Value,
    /// Name of the skill to invoke; absent means the default handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Default for TaskContent {
    fn default() -> Self {
        Self {
            input: Value::Null,
            context: Map::new(),
            parameters: empty_object(),
            skill: None,
        }
    }
}

/// Terminal status carried by a `task_update` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Completed,
    Failed,
}

impl Frame {
    /// Decode one frame from wire text.
    ///
    /// Returns `Ok(None)` for a well-formed JSON object whose `type` is not
    /// recognized; the caller logs and drops it. Malformed JSON and objects
    /// missing the `type` discriminator are protocol errors.
    pub fn decode(text: &str) -> Result<Option<Frame>, AgentError> {
        let value: Value = serde_json::from_str(text)?;
        let recognized = match value.get("type").and_then(Value::as_str) {
            Some("ping" | "pong" | "task" | "task_update" | "message") => true,
            Some(_) => false,
            None => {
                return Err(AgentError::protocol("frame is missing the `type` field"));
            }
        };

        if recognized {
            Ok(Some(serde_json::from_value(value)?))
        } else {
            Ok(None)
        }
    }

    /// Encode this frame as wire text.
    pub fn encode(&self) -> Result<String, AgentError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The task or message id this frame carries, for log correlation.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Frame::Task { task_id, .. } | Frame::TaskUpdate { task_id, .. } => Some(task_id),
            Frame::Message { id, .. } => Some(id),
            Frame::Ping | Frame::Pong => None,
        }
    }

    /// Whether this frame is droppable application traffic, as opposed to a
    /// control frame the outbox should retain under pressure.
    pub fn is_droppable(&self) -> bool {
        matches!(self, Frame::Message { .. })
    }
}
