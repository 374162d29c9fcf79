//! Tools - tool definitions and the registry used at dispatch time
//!
//! Each tool declares its delivery mode, the input keys it requires, and an
//! output contract: the fixed set of fields extracted from whatever the
//! engine returns. Normalization happens once, at the gateway boundary, so
//! the reconciler and resolver only ever see the contract shape.

use crate::error::{Error, Result};
use crate::model::DeliveryMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One field of a tool's canonical output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputField {
    /// Normalized key exposed to the pipeline (by convention `output_*`)
    pub key: String,
    /// JSON pointer into the raw engine response
    pub pointer: String,
}

/// The fixed output shape a tool exposes, regardless of what the engine
/// returns around it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputContract {
    /// Extracted fields
    pub fields: Vec<OutputField>,
}

impl OutputContract {
    /// Contract with a single field
    #[must_use]
    pub fn single(key: impl Into<String>, pointer: impl Into<String>) -> Self {
        Self {
            fields: vec![OutputField {
                key: key.into(),
                pointer: pointer.into(),
            }],
        }
    }

    /// Add a field
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.fields.push(OutputField {
            key: key.into(),
            pointer: pointer.into(),
        });
        self
    }

    /// Extract the canonical output payload from a raw engine response
    ///
    /// Fields missing from the raw payload are simply absent from the
    /// result; the contract defines shape, not presence.
    #[must_use]
    pub fn normalize(&self, raw: &Value) -> Map<String, Value> {
        let mut output = Map::new();
        for field in &self.fields {
            if let Some(value) = raw.pointer(&field.pointer) {
                output.insert(field.key.clone(), value.clone());
            }
        }
        output
    }
}

/// Tool metadata consulted by the resolver and the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool id
    pub id: String,

    /// Human-readable description
    pub description: String,

    /// How results are delivered
    pub delivery: DeliveryMode,

    /// Input keys that must be present after resolution
    #[serde(default)]
    pub required_inputs: Vec<String>,

    /// Input keys the tool understands but does not require
    #[serde(default)]
    pub optional_inputs: Vec<String>,

    /// Canonical output shape
    #[serde(default)]
    pub output_contract: OutputContract,
}

impl ToolDefinition {
    /// Create a new immediate tool with no declared inputs
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            delivery: DeliveryMode::Immediate,
            required_inputs: Vec::new(),
            optional_inputs: Vec::new(),
            output_contract: OutputContract::default(),
        }
    }

    /// Set the delivery mode
    #[must_use]
    pub fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }

    /// Declare a required input key
    #[must_use]
    pub fn with_required_input(mut self, key: impl Into<String>) -> Self {
        self.required_inputs.push(key.into());
        self
    }

    /// Declare an optional input key
    #[must_use]
    pub fn with_optional_input(mut self, key: impl Into<String>) -> Self {
        self.optional_inputs.push(key.into());
        self
    }

    /// Set the output contract
    #[must_use]
    pub fn with_output_contract(mut self, contract: OutputContract) -> Self {
        self.output_contract = contract;
        self
    }
}

/// Registry of tools known to the coordinator
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any existing definition with the same id
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.insert(tool.id.clone(), tool);
    }

    /// Look up a tool
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.get(id)
    }

    /// Look up a tool, failing with `UnknownTool` if absent
    pub fn require(&self, id: &str) -> Result<&ToolDefinition> {
        self.tools.get(id).ok_or_else(|| Error::UnknownTool(id.to_string()))
    }

    /// Registered tool ids
    #[must_use]
    pub fn tool_ids(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_extracts_contract_fields() {
        let contract = OutputContract::single("output_text", "/outputs/0/text")
            .with_field("output_image", "/outputs/0/images/0/url");

        let raw = json!({
            "status": "success",
            "outputs": [{
                "text": "a castle",
                "images": [{"url": "https://cdn.example/castle.png"}],
                "node_errors": {}
            }]
        });

        let output = contract.normalize(&raw);
        assert_eq!(output.get("output_text"), Some(&json!("a castle")));
        assert_eq!(
            output.get("output_image"),
            Some(&json!("https://cdn.example/castle.png"))
        );
        assert!(!output.contains_key("status"));
    }

    #[test]
    fn test_normalize_skips_missing_fields() {
        let contract = OutputContract::single("output_text", "/text");
        let output = contract.normalize(&json!({"other": 1}));
        assert!(output.is_empty());
    }

    #[test]
    fn test_registry_require_unknown() {
        let registry = ToolRegistry::new();
        let err = registry.require("missing").unwrap_err();
        assert!(matches!(err, Error::UnknownTool(id) if id == "missing"));
    }

    #[test]
    fn test_registry_register_and_get() {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDefinition::new("txt2img", "Text to image")
                .with_delivery(DeliveryMode::Webhook)
                .with_required_input("input_prompt"),
        );

        let tool = registry.require("txt2img").unwrap();
        assert_eq!(tool.delivery, DeliveryMode::Webhook);
        assert_eq!(tool.required_inputs, vec!["input_prompt".to_string()]);
        assert_eq!(registry.len(), 1);
    }
}
