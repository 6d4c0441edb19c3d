//! # A2A Runtime
//!
//! An Agent-to-Agent coordination runtime. An agent process registers with
//! a central directory over HTTP, holds one persistent WebSocket channel to
//! it (heartbeat, outbox, automatic reconnection with jittered backoff),
//! and executes remotely dispatched tasks through a registry of typed,
//! schema-validated skills. Every inbound task is answered with exactly one
//! correlated `task_update` frame.

pub mod agent;
pub mod card;
pub mod config;
pub mod connection;
pub mod directory;
pub mod dispatch;
pub mod errors;
pub mod protocol;
pub mod skill;

pub use agent::{A2AAgent, HistoryEntry};
pub use card::{AgentCard, AgentIdentity, Example, SkillDescriptor};
pub use config::RuntimeConfig;
pub use connection::{ConnectionManager, ConnectionState, FrameSink, RegistrationState};
pub use directory::{DirectoryClient, RegisterOutcome, RegistrationPayload};
pub use dispatch::{
    EnvelopeStatus, MessageHandler, ResultEnvelope, TaskDispatcher, TaskHandler, TaskOutcome,
};
pub use errors::{AgentError, TaskError};
pub use protocol::{Frame, TaskContent, UpdateStatus};
pub use skill::{
    global_registry, Schema, Skill, SkillRegistry, SkillResult, SkillStatus, TaskRecord,
    TaskTracker,
};

/// Library version.
pub const VERSION: &str = "0.1.0";
