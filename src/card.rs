//! Agent identity and the serializable agent card.
//!
//! The card is the declarative description of an agent: identity fields,
//! its skills with their input/output shapes, example exchanges, and
//! metadata. Cards are produced on demand and never mutated in place.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::skill::{Schema, Skill};

/// An agent's identity as known to the directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Directory-unique key.
    pub agent_id: String,
    pub name: String,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// HTTP endpoint for direct requests, when the agent exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Free-form capability strings used for discovery.
    #[serde(default)]
    pub capabilities: Vec<String>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl AgentIdentity {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            name: name.into(),
            description: description.into(),
            version: default_version(),
            endpoint: None,
            capabilities: Vec::new(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

/// Serializable description of one skill, used in registration payloads and
/// agent cards. Schemas ride along when declared.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillDescriptor {
    pub name: String,
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl SkillDescriptor {
    /// Derive a descriptor from a bare capability string: the capability is
    /// the name, and the description is the capability with underscores
    /// replaced by spaces and each word capitalized.
    pub fn from_capability(capability: &str) -> Self {
        let description = capability
            .split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            name: capability.to_string(),
            description,
            version: default_version(),
            categories: Vec::new(),
            input_schema: None,
            output_schema: None,
        }
    }
}

impl From<&Skill> for SkillDescriptor {
    fn from(skill: &Skill) -> Self {
        Self {
            name: skill.name.clone(),
            description: skill.description.clone(),
            version: skill.version.clone(),
            categories: skill.categories.clone(),
            input_schema: Some(skill.input_schema.to_document()),
            output_schema: Some(skill.output_schema.to_document()),
        }
    }
}

/// One example exchange advertised on a card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Example {
    pub input: Value,
    pub output: Value,
}

/// The agent card: identity plus skills, I/O envelopes, and examples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCard {
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub skills: Vec<SkillDescriptor>,
    pub inputs: Value,
    pub outputs: Value,
    #[serde(default)]
    pub examples: Vec<Example>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl AgentCard {
    /// Build a normalized card with the standard input/output envelopes and
    /// the metadata the directory expects (`endpoint`, `auth`,
    /// `last_updated`).
    pub fn create_standard_card(
        identity: &AgentIdentity,
        skills: Vec<SkillDescriptor>,
        examples: Vec<Example>,
        mut metadata: Map<String, Value>,
    ) -> Self {
        metadata.entry("endpoint".to_string()).or_insert_with(|| {
            Value::String(
                identity
                    .endpoint
                    .clone()
                    .unwrap_or_else(|| format!("/agents/{}", identity.agent_id)),
            )
        });
        metadata
            .entry("auth".to_string())
            .or_insert_with(|| json!({"type": "none"}));
        metadata.insert(
            "last_updated".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        Self {
            agent_id: identity.agent_id.clone(),
            name: identity.name.clone(),
            description: identity.description.clone(),
            version: identity.version.clone(),
            capabilities: identity.capabilities.clone(),
            skills,
            inputs: Schema::standard_input().to_document(),
            outputs: Schema::standard_output().to_document(),
            examples,
            metadata,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
