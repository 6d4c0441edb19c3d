//! The assembled agent runtime.
//!
//! One [`A2AAgent`] per process owns the skill registry, the connection
//! manager, the task dispatcher, and the directory client, wiring them
//! together so the dispatcher writes through the connection's frame sink
//! and the connection feeds inbound frames back to the dispatcher.
//!
//! [`A2AAgent::run`] is the public execution entry point: it runs a task
//! under a wall-clock timeout and always returns a normalized result
//! envelope — including on timeout and on handler failure.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::card::{AgentCard, AgentIdentity, Example, SkillDescriptor};
use crate::config::RuntimeConfig;
use crate::connection::{ConnectionManager, FrameSink};
use crate::directory::{DirectoryClient, RegistrationPayload};
use crate::dispatch::{
    EnvelopeStatus, MessageHandler, ResultEnvelope, TaskDispatcher, TaskHandler,
};
use crate::errors::{AgentError, TaskError};
use crate::protocol::{Frame, TaskContent};
use crate::skill::{Skill, SkillRegistry, TaskRecord};

/// Interactions kept in the in-memory conversation ring.
const HISTORY_LIMIT: usize = 10;

/// One remembered interaction.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub agent: String,
}

/// An agent process: identity, skills, and one channel to the directory.
pub struct A2AAgent {
    identity: AgentIdentity,
    config: RuntimeConfig,
    registry: Arc<SkillRegistry>,
    directory: Arc<DirectoryClient>,
    connection: Arc<ConnectionManager>,
    dispatcher: TaskDispatcher,
    state: parking_lot::RwLock<HashMap<String, Value>>,
    history: parking_lot::Mutex<VecDeque<HistoryEntry>>,
}

impl A2AAgent {
    /// Build an agent with configuration drawn from the environment.
    pub fn new(identity: AgentIdentity) -> Arc<Self> {
        Self::with_config(identity, RuntimeConfig::from_env())
    }

    /// Build an agent with explicit configuration.
    pub fn with_config(identity: AgentIdentity, config: RuntimeConfig) -> Arc<Self> {
        let registry = Arc::new(SkillRegistry::new());
        let directory = Arc::new(DirectoryClient::new(
            config.server_url.clone(),
            config.http_timeout,
            config.request_timeout,
        ));

        // Until explicit skills are registered, the advertised skill list is
        // derived from the capability strings.
        let descriptors: Vec<SkillDescriptor> = identity
            .capabilities
            .iter()
            .map(|capability| SkillDescriptor::from_capability(capability))
            .collect();
        let payload = RegistrationPayload::new(&identity, &descriptors);

        let connection = ConnectionManager::new(config.clone(), Arc::clone(&directory), payload);
        let dispatcher = TaskDispatcher::new(
            identity.agent_id.clone(),
            Arc::clone(&registry),
            Arc::clone(&connection) as Arc<dyn FrameSink>,
            config.default_confidence,
        );
        connection.set_inbound_handler(Arc::new(dispatcher.clone()));

        log::info!("agent `{}` ({}) initialized", identity.name, identity.agent_id);

        Arc::new(Self {
            identity,
            config,
            registry,
            directory,
            connection,
            dispatcher,
            state: parking_lot::RwLock::new(HashMap::new()),
            history: parking_lot::Mutex::new(VecDeque::new()),
        })
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    pub fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    // -----------------------------------------------------------------------
    // Skills
    // -----------------------------------------------------------------------

    /// Register a skill, applying this runtime's ledger limits, and refresh
    /// the skill list advertised to the directory.
    pub fn register_skill(&self, skill: Skill) -> Arc<Skill> {
        let skill =
            skill.with_tracker_limits(self.config.tracker_retention, self.config.tracker_ttl);
        let registered = self.registry.register(skill);
        self.sync_skills();
        registered
    }

    /// Remove a skill and refresh the advertised skill list.
    pub fn unregister_skill(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            self.sync_skills();
        }
        removed
    }

    /// The advertised skill descriptors: every registered skill, plus one
    /// derived descriptor per capability not covered by a skill of the same
    /// name.
    pub fn skill_descriptors(&self) -> Vec<SkillDescriptor> {
        let mut descriptors: Vec<SkillDescriptor> = self
            .registry
            .list()
            .iter()
            .map(|skill| SkillDescriptor::from(skill.as_ref()))
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));

        for capability in &self.identity.capabilities {
            if !descriptors.iter().any(|d| &d.name == capability) {
                descriptors.push(SkillDescriptor::from_capability(capability));
            }
        }
        descriptors
    }

    fn sync_skills(&self) {
        let skills = self
            .skill_descriptors()
            .iter()
            .map(|descriptor| {
                json!({
                    "name": descriptor.name,
                    "description": descriptor.description,
                    "version": descriptor.version,
                })
            })
            .collect();
        self.connection.update_skills(skills);
    }

    /// Snapshot a task's ledger record, wherever it lives.
    pub fn get_task_status(&self, task_id: &str) -> Option<TaskRecord> {
        self.registry.find_task(task_id)
    }

    /// Explicitly cancel an in-flight task.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        self.registry.cancel_task(task_id)
    }

    // -----------------------------------------------------------------------
    // Directory lifecycle
    // -----------------------------------------------------------------------

    /// Register with the directory and open the persistent channel.
    pub async fn register(&self) -> Result<(), AgentError> {
        self.connection.register().await
    }

    /// Open the persistent channel (registering first if needed).
    pub async fn connect(&self) -> Result<(), AgentError> {
        self.connection.connect().await
    }

    /// Close the channel and stay down.
    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn is_registered(&self) -> bool {
        self.connection.is_registered()
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    /// Install the fallback handler for tasks that name no skill.
    pub fn set_default_handler(&self, handler: Arc<dyn TaskHandler>) {
        self.dispatcher.set_default_handler(handler);
    }

    /// Install the application handler for inbound `message` frames.
    pub fn set_message_handler(&self, handler: Arc<dyn MessageHandler>) {
        self.dispatcher.set_message_handler(handler);
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a user input through this agent under the default wall-clock
    /// timeout. Always returns an envelope; the interaction is appended to
    /// the conversation history, error responses included.
    pub async fn run(&self, input: &str, context: Map<String, Value>) -> ResultEnvelope {
        let content = TaskContent {
            input: json!(input),
            context,
            parameters: json!({}),
            skill: None,
        };
        let envelope = self.run_task(content).await;
        self.add_to_history(input, &envelope.response);
        envelope
    }

    /// Run an arbitrary task content (skill routing included) under the
    /// default wall-clock timeout.
    pub async fn run_task(&self, content: TaskContent) -> ResultEnvelope {
        let task_id = Uuid::new_v4().to_string();
        let execution_id = &task_id[..8];
        log::info!(
            "[{execution_id}] executing task on agent `{}`",
            self.identity.agent_id
        );

        match tokio::time::timeout(
            self.config.task_timeout,
            self.dispatcher.execute(&task_id, &content),
        )
        .await
        {
            Ok(envelope) => {
                log::info!(
                    "[{execution_id}] finished in {:.2}s",
                    envelope.execution_time
                );
                envelope
            }
            Err(_) => {
                let seconds = self.config.task_timeout.as_secs_f64();
                log::error!("[{execution_id}] timed out after {seconds:.1}s");
                // Close the ledger entry; a handler still running to
                // completion will have its late result rejected.
                self.registry.time_out_task(&task_id, seconds);
                ResultEnvelope {
                    status: EnvelopeStatus::Error,
                    response: "The operation took too long to complete.".to_string(),
                    confidence: 0.0,
                    execution_time: seconds,
                    agent_id: self.identity.agent_id.clone(),
                    metadata: Map::new(),
                    error: Some(TaskError::from(&AgentError::Timeout { seconds })),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Cross-agent communication
    // -----------------------------------------------------------------------

    /// Send an application message to another agent through the directory.
    /// Queued while disconnected.
    pub async fn send_message_to_agent(
        &self,
        to: &str,
        content: Value,
    ) -> Result<(), AgentError> {
        let id = format!("msg_{}", &Uuid::new_v4().simple().to_string()[..8]);
        self.connection
            .send(Frame::Message {
                id,
                from: self.identity.agent_id.clone(),
                to: to.to_string(),
                content,
            })
            .await
    }

    /// Synchronously ask the directory to route a task to another agent.
    /// Errors surface as an `{"error": ...}` value, never as a panic.
    pub async fn request_task(&self, agent_id: &str, task: Value) -> Value {
        match self.directory.request_task(agent_id, task).await {
            Ok(result) => result,
            Err(err) => {
                log::error!("task request to agent `{agent_id}` failed: {err}");
                json!({"error": err.to_string()})
            }
        }
    }

    /// Produce this agent's card.
    pub fn agent_card(&self) -> AgentCard {
        let examples = vec![Example {
            input: json!({"message": "Hello, how are you?"}),
            output: json!({
                "response": format!(
                    "Hello, I am {}. How can I help you?",
                    self.identity.name
                )
            }),
        }];
        AgentCard::create_standard_card(
            &self.identity,
            self.skill_descriptors(),
            examples,
            Map::new(),
        )
    }

    // -----------------------------------------------------------------------
    // Scratch state & history
    // -----------------------------------------------------------------------

    /// Set a value in the agent's scratch state.
    pub fn update_state(&self, key: impl Into<String>, value: Value) {
        self.state.write().insert(key.into(), value);
    }

    /// Read a value from the agent's scratch state.
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state.read().get(key).cloned()
    }

    /// Append an interaction to the bounded conversation ring.
    pub fn add_to_history(&self, user: &str, agent: &str) {
        let mut history = self.history.lock();
        history.push_back(HistoryEntry {
            timestamp: Utc::now(),
            user: user.to_string(),
            agent: agent.to_string(),
        });
        while history.len() > HISTORY_LIMIT {
            history.pop_front();
        }
    }

    /// The most recent interactions, oldest first.
    pub fn history(&self, max_items: Option<usize>) -> Vec<HistoryEntry> {
        let history = self.history.lock();
        let skip = max_items
            .map(|max| history.len().saturating_sub(max))
            .unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }
}
