//! Declarative data-shape descriptors for skill inputs and outputs.
//!
//! Schemas are declared up front at skill registration; there is no runtime
//! inference. A schema is a flat object shape: named properties, each with a
//! value type, an optional default, and optional enum restriction. Validation
//! returns the input with defaults filled in, or a validation error naming
//! the offending property.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::AgentError;

/// Value types a property can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ValueType {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One declared property of an object schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySchema {
    /// Property value type.
    #[serde(rename = "type")]
    pub value_type: ValueType,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Default applied when the property is absent and not required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values, when restricted.
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,
}

impl PropertySchema {
    pub fn new(value_type: ValueType) -> Self {
        Self { value_type, description: None, default: None, enum_values: None }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// An object schema: named properties plus the list of required names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Schema {
    /// An empty schema that accepts any object.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add a required property.
    pub fn require(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, property);
        self
    }

    /// Add an optional property.
    pub fn optional(mut self, name: impl Into<String>, property: PropertySchema) -> Self {
        self.properties.insert(name.into(), property);
        self
    }

    /// The standard agent input envelope: a required `message` text plus an
    /// optional `context` object.
    pub fn standard_input() -> Self {
        Self::empty()
            .require(
                "message",
                PropertySchema::new(ValueType::String).with_description("User message"),
            )
            .optional(
                "context",
                PropertySchema::new(ValueType::Object)
                    .with_description("Additional processing context"),
            )
    }

    /// The standard agent output envelope: a required `response` text plus
    /// optional `confidence` and `metadata`.
    pub fn standard_output() -> Self {
        Self::empty()
            .require(
                "response",
                PropertySchema::new(ValueType::String).with_description("Agent response"),
            )
            .optional(
                "confidence",
                PropertySchema::new(ValueType::Number)
                    .with_description("Confidence in the response (0-1)"),
            )
            .optional(
                "metadata",
                PropertySchema::new(ValueType::Object)
                    .with_description("Additional response metadata"),
            )
    }

    /// Validate `input` against this schema.
    ///
    /// Returns the input object with declared defaults filled in for absent
    /// optional properties. Undeclared extra properties pass through.
    pub fn validate(&self, input: &Value) -> Result<Value, AgentError> {
        let object = input
            .as_object()
            .ok_or_else(|| AgentError::validation("expected a JSON object"))?;

        for name in &self.required {
            if !object.contains_key(name) {
                return Err(AgentError::validation(format!(
                    "missing required property `{name}`"
                )));
            }
        }

        let mut validated: Map<String, Value> = object.clone();
        for (name, property) in &self.properties {
            match validated.get(name) {
                Some(value) => {
                    if !property.value_type.matches(value) {
                        return Err(AgentError::validation(format!(
                            "property `{name}` has the wrong type"
                        )));
                    }
                    if let Some(allowed) = &property.enum_values {
                        if !allowed.contains(value) {
                            return Err(AgentError::validation(format!(
                                "property `{name}` is not one of the allowed values"
                            )));
                        }
                    }
                }
                None => {
                    if let Some(default) = &property.default {
                        validated.insert(name.clone(), default.clone());
                    }
                }
            }
        }

        Ok(Value::Object(validated))
    }

    /// Render as a JSON-Schema-style object for cards and descriptors.
    pub fn to_document(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": self.properties,
            "required": self.required,
        })
    }
}
