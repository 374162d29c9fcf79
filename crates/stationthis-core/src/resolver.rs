//! Resolver - builds the final input set for one step invocation
//!
//! The merge is an explicit ordered list of sources, lowest precedence
//! first: pipeline context, static parameters, explicit input mappings,
//! one-off overrides. A later source always wins a key collision. After the
//! merge, every tool-declared required input must be present; a missing key
//! is an authoring defect, never defaulted and never retried.

use crate::error::{Error, Result};
use crate::model::{InputMapping, PipelineContext, StepDefinition};
use crate::tools::ToolDefinition;
use serde_json::{Map, Value};

/// Resolve the inputs for invoking `step`'s tool
pub fn resolve_step_inputs(
    tool: &ToolDefinition,
    step: &StepDefinition,
    context: &PipelineContext,
) -> Result<Map<String, Value>> {
    let mut mapped = Map::new();
    for (input, mapping) in &step.input_mappings {
        match mapping {
            InputMapping::Static { value } => {
                mapped.insert(input.clone(), value.clone());
            }
            InputMapping::NodeOutput { key } => {
                // An unresolved reference contributes nothing; the required-
                // input check below decides whether that is fatal.
                if let Some(value) = context.get(key) {
                    mapped.insert(input.clone(), value.clone());
                }
            }
        }
    }

    let sources: [&Map<String, Value>; 4] =
        [context.values(), &step.params, &mapped, &step.overrides];

    let mut inputs = Map::new();
    for source in sources {
        for (key, value) in source {
            inputs.insert(key.clone(), value.clone());
        }
    }

    let missing: Vec<&str> = tool
        .required_inputs
        .iter()
        .filter(|key| !inputs.contains_key(key.as_str()))
        .map(String::as_str)
        .collect();

    if !missing.is_empty() {
        return Err(Error::Definition(format!(
            "tool '{}' is missing required input(s): {}",
            tool.id,
            missing.join(", ")
        )));
    }

    Ok(inputs)
}
