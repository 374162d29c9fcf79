//! Error types for the execution coordinator
//!
//! The taxonomy tracks the ways a run can go wrong: authoring defects
//! (`Definition`), exhausted submissions to the execution engine
//! (`Invocation`), lost conditional writes (`AggregationConflict`), and
//! record store failures. A duplicate completion signal is not an error
//! callers ever see — the reconciler logs it and drops it.

use crate::model::RunStatus;
use thiserror::Error;
use uuid::Uuid;

/// Coordinator error type
#[derive(Debug, Error)]
pub enum Error {
    /// A required input could not be resolved; the step definition is malformed
    #[error("definition error: {0}")]
    Definition(String),

    /// Submission to the execution engine failed after bounded retries
    #[error("invocation failed after {attempts} attempt(s): {message}")]
    Invocation {
        /// Total submission attempts made
        attempts: u32,
        /// Last engine error observed
        message: String,
    },

    /// Transient failure from the execution engine (retried by the gateway)
    #[error("engine error: {0}")]
    Engine(String),

    /// A run update kept losing to concurrent writers
    #[error("conflicting updates to run {0}")]
    AggregationConflict(Uuid),

    /// A conditional write lost to a concurrent writer (retryable)
    #[error("version conflict on run {0}")]
    VersionConflict(Uuid),

    /// The step result already reached a terminal status
    #[error("step result {0} is already terminal")]
    StepAlreadyTerminal(Uuid),

    /// The run already reached a terminal status
    #[error("run {id} is already {status}")]
    RunTerminal {
        /// Run identifier
        id: Uuid,
        /// Current terminal status
        status: RunStatus,
    },

    /// Run not found in the record store
    #[error("run {0} not found")]
    RunNotFound(Uuid),

    /// Step result not found in the record store
    #[error("step result not found: {0}")]
    StepNotFound(String),

    /// Spell definition not registered
    #[error("unknown definition '{0}'")]
    UnknownDefinition(String),

    /// Tool not registered
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    /// Record store backend failure
    #[error("store error: {0}")]
    Store(String),
}

/// Coordinator result type
pub type Result<T> = std::result::Result<T, Error>;
