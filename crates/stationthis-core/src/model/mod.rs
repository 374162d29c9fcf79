//! Model - records and definitions for spell/cook execution
//!
//! A [`Run`] is one end-to-end execution of a [`SpellDefinition`]. Each tool
//! invocation within a run produces one [`StepResult`]. Key-value state
//! flowing between steps lives in the [`PipelineContext`], which is rebuilt
//! at every step boundary and never persisted as its own entity.

mod context;
mod result;
mod run;
mod step;

pub use context::PipelineContext;
pub use result::{
    CompletionSignal, DeliveryMode, StepResult, StepStatus, SYNTHETIC_FINAL_TOOL,
};
pub use run::{Run, RunKind, RunStatus};
pub use step::{InputMapping, SpellDefinition, StepDefinition};
