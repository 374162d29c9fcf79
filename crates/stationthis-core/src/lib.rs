//! StationThis Core - Spell Execution Pipeline
//!
//! This crate coordinates multi-step generative tool pipelines (spells and
//! cooks) for the StationThis assistant, including:
//! - Coordinator: Driving runs step by step across process instances
//! - Resolver: Merging context, parameters, and mappings into tool inputs
//! - Gateway: Submitting invocations with bounded retry
//! - Reconciler: Idempotent handling of out-of-band completion signals
//! - Aggregator: Run-level cost and status bookkeeping
//! - Store: The persistence boundary, with an in-memory reference
//!   implementation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod model;
pub mod notify;
pub mod reconciler;
pub mod resolver;
pub mod spellbook;
pub mod store;
pub mod tools;

pub use aggregator::RunAggregator;
pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use error::{Error, Result};
pub use gateway::{Dispatch, ExecutionEngine, InvocationGateway, Submission};
pub use model::{
    CompletionSignal, DeliveryMode, InputMapping, PipelineContext, Run, RunKind, RunStatus,
    SpellDefinition, StepDefinition, StepResult, StepStatus, SYNTHETIC_FINAL_TOOL,
};
pub use notify::{LogNotifier, Notifier};
pub use reconciler::CompletionReconciler;
pub use resolver::resolve_step_inputs;
pub use spellbook::SpellBook;
pub use store::{MemoryRecordStore, RecordStore, RunPatch, StepOutcome};
pub use tools::{OutputContract, OutputField, ToolDefinition, ToolRegistry};
