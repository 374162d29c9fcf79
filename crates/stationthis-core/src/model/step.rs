//! Step and spell definitions
//!
//! A [`SpellDefinition`] is an ordered list of [`StepDefinition`]s. Each
//! step names a tool, carries static parameters, and may declare explicit
//! input mappings and output renames that wire step outputs into later
//! inputs.

use crate::model::RunKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// How one input key of a step is filled in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InputMapping {
    /// A literal value baked into the definition
    Static {
        /// The literal value
        value: Value,
    },
    /// A reference to a named key already in the pipeline context
    ///
    /// An unresolved reference contributes nothing; whether the step can
    /// still run depends on the tool's required inputs.
    NodeOutput {
        /// Context key to read
        key: String,
    },
}

/// One entry in the ordered step list of a spell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Tool to invoke
    pub tool_id: String,

    /// Static parameters authored into the definition
    #[serde(default)]
    pub params: Map<String, Value>,

    /// Explicit input mappings, keyed by input name
    #[serde(default)]
    pub input_mappings: HashMap<String, InputMapping>,

    /// Legacy one-off parameter overrides (highest precedence)
    #[serde(default)]
    pub overrides: Map<String, Value>,

    /// Explicit renames applied to this step's normalized output keys
    ///
    /// Keys without an explicit rename fall back to the conventional
    /// `output_x -> input_x` rename.
    #[serde(default)]
    pub output_mappings: HashMap<String, String>,
}

impl StepDefinition {
    /// Create a step invoking the given tool
    #[must_use]
    pub fn new(tool_id: impl Into<String>) -> Self {
        Self {
            tool_id: tool_id.into(),
            params: Map::new(),
            input_mappings: HashMap::new(),
            overrides: Map::new(),
            output_mappings: HashMap::new(),
        }
    }

    /// Add a static parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Add an explicit input mapping
    #[must_use]
    pub fn with_input_mapping(mut self, input: impl Into<String>, mapping: InputMapping) -> Self {
        self.input_mappings.insert(input.into(), mapping);
        self
    }

    /// Add a one-off override
    #[must_use]
    pub fn with_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.overrides.insert(key.into(), value);
        self
    }

    /// Add an explicit output rename
    #[must_use]
    pub fn with_output_mapping(
        mut self,
        output: impl Into<String>,
        input: impl Into<String>,
    ) -> Self {
        self.output_mappings.insert(output.into(), input.into());
        self
    }
}

/// An ordered multi-step definition (a spell or a cook collection)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpellDefinition {
    /// Unique identifier
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Whether runs of this definition are casts or cooks
    pub kind: RunKind,

    /// Ordered steps
    pub steps: Vec<StepDefinition>,
}

impl SpellDefinition {
    /// Create a definition with no steps
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: RunKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            steps: Vec::new(),
        }
    }

    /// Append a step
    #[must_use]
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Number of steps
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check whether the definition has no steps
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
