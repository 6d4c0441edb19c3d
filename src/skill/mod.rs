//! Skills: validated, typed units of work.
//!
//! A skill bundles metadata, declared input/output schemas, and a handler
//! value — an async closure, or a blocking closure that is routed to a
//! dedicated worker so it can never stall the channel reader. Execution
//! always goes through [`Skill::execute_task`], which owns the task's
//! lifecycle in the skill's ledger: validate, run, close.

pub mod registry;
pub mod schema;
pub mod tracker;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{AgentError, TaskError};

pub use registry::{global_registry, SkillRegistry};
pub use schema::{PropertySchema, Schema, ValueType};
pub use tracker::{SkillStatus, TaskRecord, TaskTracker};

/// Default per-skill ledger ceiling when none is configured.
pub const DEFAULT_TRACKER_RETENTION: usize = 100;
/// Default terminal-record TTL when none is configured.
pub const DEFAULT_TRACKER_TTL: Duration = Duration::from_secs(3600);

/// Handler backing a skill: either async, or blocking work that must run
/// on a worker distinct from the message loop.
#[derive(Clone)]
pub enum SkillHandler {
    Async(Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, AgentError>> + Send + Sync>),
    Blocking(Arc<dyn Fn(Value) -> Result<Value, AgentError> + Send + Sync>),
}

impl std::fmt::Debug for SkillHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Async(_) => f.write_str("SkillHandler::Async"),
            Self::Blocking(_) => f.write_str("SkillHandler::Blocking"),
        }
    }
}

/// Result of one skill execution.
#[derive(Debug, Clone)]
pub struct SkillResult {
    pub skill_id: Uuid,
    pub skill_name: String,
    pub task_id: String,
    pub status: SkillStatus,
    pub result: Option<Value>,
    pub error: Option<TaskError>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Wall-clock seconds from start to end, validation included.
    pub execution_time: f64,
}

impl SkillResult {
    pub fn is_success(&self) -> bool {
        self.status == SkillStatus::Completed
    }
}

/// A named, typed operation an agent can perform.
#[derive(Debug)]
pub struct Skill {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub version: String,
    pub input_schema: Schema,
    pub output_schema: Schema,
    pub categories: Vec<String>,
    pub requires_auth: bool,
    handler: SkillHandler,
    tracker: TaskTracker,
}

impl Skill {
    /// Create a skill around an async handler.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, AgentError>> + Send + 'static,
    {
        let handler = SkillHandler::Async(Arc::new(
            move |input| -> BoxFuture<'static, Result<Value, AgentError>> {
                Box::pin(handler(input))
            },
        ));
        Self::with_handler(name, description, handler)
    }

    /// Create a skill around a blocking handler; it will run on a worker
    /// thread, never on the channel reader.
    pub fn blocking<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, AgentError> + Send + Sync + 'static,
    {
        Self::with_handler(name, description, SkillHandler::Blocking(Arc::new(handler)))
    }

    /// Create a skill from an already-built handler value.
    pub fn with_handler(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: SkillHandler,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: description.into(),
            version: "1.0.0".to_string(),
            input_schema: Schema::empty(),
            output_schema: Schema::empty(),
            categories: Vec::new(),
            requires_auth: false,
            handler,
            tracker: TaskTracker::new(DEFAULT_TRACKER_RETENTION, DEFAULT_TRACKER_TTL),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_input_schema(mut self, schema: Schema) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn with_output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = schema;
        self
    }

    pub fn with_categories(mut self, categories: Vec<String>) -> Self {
        self.categories = categories;
        self
    }

    pub fn with_requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }

    /// Override the ledger's retention ceiling and terminal-record TTL.
    pub fn with_tracker_limits(mut self, retention: usize, ttl: Duration) -> Self {
        self.tracker = TaskTracker::new(retention, ttl);
        self
    }

    /// Whether the handler is async (as opposed to blocking-on-a-worker).
    pub fn is_async(&self) -> bool {
        matches!(self.handler, SkillHandler::Async(_))
    }

    /// Execute the skill as a tracked task.
    ///
    /// The input is validated first; a validation failure closes the task
    /// `failed` without ever invoking the handler. Otherwise the task moves
    /// `pending -> running -> completed|failed` and the handler's error kind
    /// is preserved in the result.
    pub async fn execute_task(&self, task_id: impl Into<String>, input: Value) -> SkillResult {
        let task_id = task_id.into();
        let started = Instant::now();
        let start_time = Utc::now();

        if let Err(err) = self
            .tracker
            .create(&task_id, Some(self.name.clone()), input.clone())
        {
            log::error!("skill `{}` rejected task `{task_id}`: {err}", self.name);
            return self.failure(task_id, start_time, started, &err);
        }

        let validated = match self.input_schema.validate(&input) {
            Ok(validated) => validated,
            Err(err) => {
                log::warn!(
                    "skill `{}` input validation failed for task `{task_id}`: {err}",
                    self.name
                );
                self.tracker
                    .fail(&task_id, TaskError::from(&err), started.elapsed().as_secs_f64());
                return self.failure(task_id, start_time, started, &err);
            }
        };

        self.tracker.mark_running(&task_id);

        let outcome = match &self.handler {
            SkillHandler::Async(handler) => handler(validated).await,
            SkillHandler::Blocking(handler) => {
                let handler = Arc::clone(handler);
                match tokio::task::spawn_blocking(move || handler(validated)).await {
                    Ok(result) => result,
                    Err(join_err) => Err(AgentError::handler(format!(
                        "handler aborted: {join_err}"
                    ))),
                }
            }
        };

        let execution_time = started.elapsed().as_secs_f64();
        match outcome {
            Ok(value) => {
                if !self.output_schema.properties.is_empty()
                    && self.output_schema.validate(&value).is_err()
                {
                    log::warn!(
                        "skill `{}` produced output not matching its declared schema",
                        self.name
                    );
                }
                self.tracker.complete(&task_id, value.clone(), execution_time);
                SkillResult {
                    skill_id: self.id,
                    skill_name: self.name.clone(),
                    task_id,
                    status: SkillStatus::Completed,
                    result: Some(value),
                    error: None,
                    start_time,
                    end_time: Utc::now(),
                    execution_time,
                }
            }
            Err(err) => {
                log::error!("skill `{}` failed task `{task_id}`: {err}", self.name);
                self.tracker
                    .fail(&task_id, TaskError::from(&err), execution_time);
                self.failure(task_id, start_time, started, &err)
            }
        }
    }

    /// Snapshot the status of one of this skill's tasks.
    pub fn get_task_status(&self, task_id: &str) -> Option<TaskRecord> {
        self.tracker.get(task_id)
    }

    /// Close an in-flight task with a timeout error. The handler may still
    /// run to completion, but its late result is rejected by the ledger.
    pub fn time_out_task(&self, task_id: &str, seconds: f64) -> bool {
        self.tracker.fail(
            task_id,
            TaskError::from(&AgentError::Timeout { seconds }),
            seconds,
        )
    }

    /// Explicitly cancel an in-flight task.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.tracker.cancel(task_id)
    }

    /// The skill's ledger, for enumeration.
    pub fn ledger(&self) -> &TaskTracker {
        &self.tracker
    }

    fn failure(
        &self,
        task_id: String,
        start_time: DateTime<Utc>,
        started: Instant,
        err: &AgentError,
    ) -> SkillResult {
        SkillResult {
            skill_id: self.id,
            skill_name: self.name.clone(),
            task_id,
            status: SkillStatus::Failed,
            result: None,
            error: Some(TaskError::from(err)),
            start_time,
            end_time: Utc::now(),
            execution_time: started.elapsed().as_secs_f64(),
        }
    }
}
