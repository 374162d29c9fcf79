//! Store - the Execution Record Store seam
//!
//! The record store is the only state shared between coordinator instances:
//! a completion callback may be handled by a different process than the one
//! that dispatched the step, so every mutation here is a partial patch with
//! a conditional guard rather than a document replacement. Run updates are
//! guarded by a version counter; step terminalization is a compare-and-set
//! on `pending`.

mod memory;

pub use memory::MemoryRecordStore;

use crate::error::Result;
use crate::model::{Run, RunStatus, StepResult, StepStatus};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Partial update to a run record
///
/// `apply_to` is the single definition of patch semantics; every backend
/// applies patches through it so the field rules cannot drift.
#[derive(Debug, Clone, Default)]
pub struct RunPatch {
    /// New status, if the run is transitioning
    pub status: Option<RunStatus>,
    /// Cost delta to add (never subtracts)
    pub add_cost: f64,
    /// Step-result id to append to the run's list
    pub push_step_result: Option<Uuid>,
    /// Failure reason to attach
    pub failure_reason: Option<String>,
    /// Terminal timestamp to set
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunPatch {
    /// Create an empty patch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status transition
    #[must_use]
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Add a cost delta
    #[must_use]
    pub fn with_cost(mut self, delta: f64) -> Self {
        self.add_cost = delta;
        self
    }

    /// Append a step-result id
    #[must_use]
    pub fn with_step_result(mut self, id: Uuid) -> Self {
        self.push_step_result = Some(id);
        self
    }

    /// Attach a failure reason
    #[must_use]
    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    /// Stamp the terminal timestamp with the current time
    #[must_use]
    pub fn finished_now(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// Apply the patch to an in-memory run, bumping version and updated_at
    pub fn apply_to(&self, run: &mut Run) {
        if let Some(status) = self.status {
            run.status = status;
        }
        run.total_cost += self.add_cost;
        if let Some(id) = self.push_step_result {
            run.step_result_ids.push(id);
        }
        if let Some(reason) = &self.failure_reason {
            run.failure_reason = Some(reason.clone());
        }
        if let Some(at) = self.completed_at {
            run.completed_at = Some(at);
        }
        run.updated_at = Utc::now();
        run.version += 1;
    }
}

/// Terminal outcome applied to a pending step result
#[derive(Debug, Clone)]
pub enum StepOutcome {
    /// The step succeeded
    Success {
        /// Raw engine response
        raw: Value,
        /// Normalized output payload
        output: Map<String, Value>,
        /// Cost delta in points
        cost: f64,
        /// Execution duration in milliseconds
        duration_ms: Option<i64>,
    },
    /// The step failed
    Failed {
        /// Failure message
        error: String,
        /// Cost delta in points (usually zero)
        cost: f64,
    },
}

impl StepOutcome {
    /// The terminal status this outcome produces
    #[must_use]
    pub fn status(&self) -> StepStatus {
        match self {
            Self::Success { .. } => StepStatus::Success,
            Self::Failed { .. } => StepStatus::Failed,
        }
    }

    /// Apply the outcome to an in-memory record
    pub fn apply_to(&self, record: &mut StepResult) {
        match self {
            Self::Success {
                raw,
                output,
                cost,
                duration_ms,
            } => {
                record.status = StepStatus::Success;
                record.raw_response = Some(raw.clone());
                record.output = Some(output.clone());
                record.cost = *cost;
                record.duration_ms = *duration_ms;
            }
            Self::Failed { error, cost } => {
                record.status = StepStatus::Failed;
                record.error = Some(error.clone());
                record.cost = *cost;
            }
        }
        record.completed_at = Some(Utc::now());
    }
}

/// Storage backend for run and step-result records
///
/// Backends must honor two guards: `update_run` only applies when the
/// caller-supplied version matches and the run has not reached a terminal
/// status, and `complete_step_result` only applies to a `pending` record.
/// The failures are distinct error variants so callers can decide between
/// retrying, stopping, and dropping a duplicate.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a new run record
    async fn create_run(&self, run: &Run) -> Result<()>;

    /// Fetch a run by id
    async fn get_run(&self, id: Uuid) -> Result<Run>;

    /// Apply a partial patch, conditional on the expected version
    ///
    /// Returns `VersionConflict` when a concurrent writer got there first
    /// and `RunTerminal` when the run already reached a terminal status.
    /// Terminal runs accept no patch at all, so a completion racing a
    /// cancellation cannot touch the frozen cost and step list.
    async fn update_run(&self, id: Uuid, expected_version: i64, patch: RunPatch) -> Result<Run>;

    /// Insert a new step-result record
    async fn create_step_result(&self, record: &StepResult) -> Result<()>;

    /// Fetch a step result by id
    async fn get_step_result(&self, id: Uuid) -> Result<StepResult>;

    /// Find the step result carrying an engine reference, if any
    async fn find_step_by_external_ref(&self, external_ref: &str) -> Result<Option<StepResult>>;

    /// Attach the engine reference to a pending record
    async fn attach_external_ref(&self, id: Uuid, external_ref: &str) -> Result<()>;

    /// Move a pending record to a terminal status (compare-and-set)
    ///
    /// Returns `StepAlreadyTerminal` when the record already completed,
    /// which is how duplicate completion signals are detected.
    async fn complete_step_result(&self, id: Uuid, outcome: StepOutcome) -> Result<StepResult>;

    /// All step results for a run, in creation order
    async fn list_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>>;

    /// Backend name, for logging
    fn name(&self) -> &str;
}
