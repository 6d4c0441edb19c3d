//! Error types for the A2A runtime.
//!
//! A single [`AgentError`] enum covers every failure the runtime can
//! produce, with a stable wire-level `kind` string for each variant.
//! Transport failures are split into fatal authentication rejections and
//! retryable transient errors; the connection machines consult
//! [`AgentError::is_fatal`] and [`AgentError::is_retryable`] to decide
//! whether another attempt is worth making.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by the A2A runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Input failed its declared schema check; the handler was never invoked.
    #[error("input validation failed: {message}")]
    Validation { message: String },

    /// A referenced skill or task id is unknown.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// A handler exceeded its wall-clock limit.
    #[error("execution timed out after {seconds:.1}s")]
    Timeout { seconds: f64 },

    /// A handler raised an unexpected failure.
    #[error("handler error: {message}")]
    Handler { message: String },

    /// Malformed frame, duplicate task id, or another invariant violation.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// The directory rejected the agent's credentials. Fatal; never retried.
    #[error("authentication rejected: {message}")]
    Auth { message: String },

    /// Network, WebSocket, or HTTP failure that may succeed on retry.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// The outbox or a task ledger refused new work at its ceiling.
    #[error("capacity exceeded: {message}")]
    Capacity { message: String },
}

impl AgentError {
    /// Shorthand constructors used throughout the runtime.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler { message: message.into() }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity { message: message.into() }
    }

    /// The stable wire-level kind string for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Timeout { .. } => "timeout",
            Self::Handler { .. } => "handler",
            Self::Protocol { .. } => "protocol",
            Self::Auth { .. } => "auth",
            Self::Transport { .. } => "transport",
            Self::Capacity { .. } => "capacity",
        }
    }

    /// Whether this error must abort its state machine without retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol { message: err.to_string() }
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::Auth { message: err.to_string() }
            }
            _ => Self::Transport { message: err.to_string() },
        }
    }
}

/// The structured error object carried in result envelopes and
/// `task_update` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    /// Human-readable error message.
    pub message: String,
    /// Stable error kind (`validation`, `timeout`, `handler`, ...).
    pub kind: String,
}

impl TaskError {
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { message: message.into(), kind: kind.into() }
    }
}

impl From<&AgentError> for TaskError {
    fn from(err: &AgentError) -> Self {
        Self { message: err.to_string(), kind: err.kind().to_string() }
    }
}

impl From<AgentError> for TaskError {
    fn from(err: AgentError) -> Self {
        Self::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(AgentError::validation("x").kind(), "validation");
        assert_eq!(AgentError::not_found("x").kind(), "not_found");
        assert_eq!(AgentError::Timeout { seconds: 1.0 }.kind(), "timeout");
        assert_eq!(AgentError::handler("x").kind(), "handler");
        assert_eq!(AgentError::protocol("x").kind(), "protocol");
        assert_eq!(AgentError::auth("x").kind(), "auth");
        assert_eq!(AgentError::transport("x").kind(), "transport");
        assert_eq!(AgentError::capacity("x").kind(), "capacity");
    }

    #[test]
    fn test_only_auth_is_fatal() {
        assert!(AgentError::auth("denied").is_fatal());
        assert!(!AgentError::transport("refused").is_fatal());
        assert!(!AgentError::validation("bad").is_fatal());
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AgentError::transport("refused").is_retryable());
        assert!(AgentError::Timeout { seconds: 30.0 }.is_retryable());
        assert!(!AgentError::auth("denied").is_retryable());
        assert!(!AgentError::validation("bad").is_retryable());
    }

    #[test]
    fn test_task_error_from_agent_error() {
        let err = AgentError::validation("missing field `text`");
        let task_err = TaskError::from(&err);
        assert_eq!(task_err.kind, "validation");
        assert!(task_err.message.contains("missing field `text`"));
    }
}
