//! HTTP client for the directory API.
//!
//! Two operations: registering this agent's descriptor, and asking the
//! directory to route a task to another agent. Both carry bounded per-call
//! timeouts; retries and backoff are the connection manager's concern.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::card::{AgentIdentity, SkillDescriptor};
use crate::errors::AgentError;

/// The registration body posted to `/agents/register`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationPayload {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub endpoint: Option<String>,
    pub version: String,
    /// Slim skill descriptors: name, description, version.
    pub skills: Vec<Value>,
    pub auth: Value,
}

impl RegistrationPayload {
    pub fn new(identity: &AgentIdentity, skills: &[SkillDescriptor]) -> Self {
        Self {
            agent_id: identity.agent_id.clone(),
            name: identity.name.clone(),
            description: identity.description.clone(),
            capabilities: identity.capabilities.clone(),
            endpoint: identity.endpoint.clone(),
            version: identity.version.clone(),
            skills: skills
                .iter()
                .map(|skill| {
                    json!({
                        "name": skill.name,
                        "description": skill.description,
                        "version": skill.version,
                    })
                })
                .collect(),
            auth: json!({"type": "none"}),
        }
    }
}

/// Outcome of a registration call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// The directory accepted the descriptor.
    Accepted,
    /// HTTP 409 — the agent was already registered; treated as success.
    AlreadyRegistered,
}

/// HTTP client for registration and cross-agent task requests.
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    http: reqwest::Client,
    base_url: String,
    register_timeout: Duration,
    request_timeout: Duration,
}

impl DirectoryClient {
    pub fn new(
        base_url: impl Into<String>,
        register_timeout: Duration,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            register_timeout,
            request_timeout,
        }
    }

    /// POST the agent descriptor to `/agents/register`.
    ///
    /// 2xx with `status: "success"` registers; 409 means the agent already
    /// exists and is also success. Everything else is a transient transport
    /// error for the caller's retry policy.
    pub async fn register_agent(
        &self,
        payload: &RegistrationPayload,
    ) -> Result<RegisterOutcome, AgentError> {
        let url = format!("{}/agents/register", self.base_url);
        log::debug!("registering agent `{}` at {url}", payload.agent_id);

        let response = self
            .http
            .post(&url)
            .timeout(self.register_timeout)
            .json(payload)
            .send()
            .await
            .map_err(AgentError::from)?;

        let status = response.status();
        if status.as_u16() == 409 {
            log::info!(
                "agent `{}` already registered with the directory",
                payload.agent_id
            );
            return Ok(RegisterOutcome::AlreadyRegistered);
        }
        if !status.is_success() {
            return Err(AgentError::transport(format!(
                "registration returned HTTP {status}"
            )));
        }

        let body: Value = response.json().await.map_err(AgentError::from)?;
        match body.get("status").and_then(Value::as_str) {
            Some("success") => Ok(RegisterOutcome::Accepted),
            other => {
                let message = body
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("no error message");
                Err(AgentError::transport(format!(
                    "registration rejected (status={}): {message}",
                    other.unwrap_or("missing")
                )))
            }
        }
    }

    /// Ask the directory to route a task to another agent and wait for the
    /// routing result.
    pub async fn request_task(&self, agent_id: &str, task: Value) -> Result<Value, AgentError> {
        let url = format!("{}/agents/request", self.base_url);
        log::debug!("requesting task from agent `{agent_id}` via {url}");

        let response = self
            .http
            .post(&url)
            .timeout(self.request_timeout)
            .json(&json!({"agent_id": agent_id, "task": task}))
            .send()
            .await
            .map_err(AgentError::from)?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::transport(format!(
                "task request returned HTTP {status}"
            )));
        }
        response.json().await.map_err(AgentError::from)
    }
}
