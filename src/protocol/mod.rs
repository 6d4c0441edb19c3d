//! Wire protocol for the agent ↔ directory channel.
//!
//! Every frame on the WebSocket is one JSON object tagged by `type`.
//! Unknown types are never an error: the reader logs and drops them so the
//! protocol can grow without breaking deployed agents.

pub mod builders;
pub mod frames;

pub use frames::{Frame, TaskContent, UpdateStatus};
