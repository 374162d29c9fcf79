//! Reconciler - exactly-once terminalization and output folding
//!
//! Immediate and webhook completions both flow through here, which is what
//! guarantees step N+1 is never dispatched while step N is pending. The
//! terminal transition is a compare-and-set in the record store: whichever
//! signal wins the race reconciles, and every duplicate is logged and
//! dropped without touching run state.

use crate::error::{Error, Result};
use crate::model::{StepDefinition, StepResult};
use crate::store::{RecordStore, StepOutcome};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Applies terminal outcomes to step results
pub struct CompletionReconciler {
    store: Arc<dyn RecordStore>,
}

impl CompletionReconciler {
    /// Create a reconciler
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Move a pending step result to a terminal status
    ///
    /// Returns `None` when the record was already terminal — the duplicate
    /// is suppressed here and never reaches run state.
    pub async fn terminalize(
        &self,
        record: &StepResult,
        outcome: StepOutcome,
    ) -> Result<Option<StepResult>> {
        match self.store.complete_step_result(record.id, outcome).await {
            Ok(done) => Ok(Some(done)),
            Err(Error::StepAlreadyTerminal(id)) => {
                debug!(step_id = %id, "duplicate completion signal ignored");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Fold a step's normalized output into the keys the next step sees
    ///
    /// The normalized keys themselves are kept, plus a renamed copy per the
    /// step's explicit output mappings. Keys without an explicit rule fall
    /// back to the conventional `output_x -> input_x` rename.
    #[must_use]
    pub fn fold_output(
        step: &StepDefinition,
        output: &Map<String, Value>,
    ) -> Map<String, Value> {
        let mut folded = output.clone();
        for (key, value) in output {
            if let Some(target) = step.output_mappings.get(key) {
                folded.insert(target.clone(), value.clone());
            } else if let Some(suffix) = key.strip_prefix("output_") {
                folded.insert(format!("input_{suffix}"), value.clone());
            }
        }
        folded
    }
}
