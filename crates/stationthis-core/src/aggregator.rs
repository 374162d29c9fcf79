//! Aggregator - run-level bookkeeping on step completions
//!
//! Every run mutation goes through a fresh-read / conditional-write loop
//! bounded by `max_aggregation_retries`. The version guard makes the final
//! status transition win exactly once, which is what downstream relies on
//! for exactly-once terminal notifications.

use crate::error::{Error, Result};
use crate::model::{Run, RunStatus, StepResult};
use crate::store::{RecordStore, RunPatch};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Maintains the parent run record as step results reach terminal status
pub struct RunAggregator {
    store: Arc<dyn RecordStore>,
    max_retries: u32,
}

impl RunAggregator {
    /// Create an aggregator
    #[must_use]
    pub fn new(store: Arc<dyn RecordStore>, max_retries: u32) -> Self {
        Self {
            store,
            max_retries: max_retries.max(1),
        }
    }

    /// Append a terminal step to the run: push its id and add its cost
    ///
    /// The step list is ordered by completion, not dispatch, and the cost
    /// ledger never decreases: a negative engine-reported delta is clamped
    /// to zero and logged. A run that already reached a terminal status
    /// rejects the patch with `RunTerminal`; callers treat that as a stop
    /// signal, not a failure.
    pub async fn record_step(&self, run_id: Uuid, step: &StepResult) -> Result<Run> {
        let cost = if step.cost < 0.0 {
            warn!(step_id = %step.id, cost = step.cost, "negative cost delta clamped to zero");
            0.0
        } else {
            step.cost
        };

        let step_id = step.id;
        let run = self
            .patch_with_retry(run_id, move |_| {
                Ok(RunPatch::new().with_step_result(step_id).with_cost(cost))
            })
            .await?;
        debug!(run_id = %run.id, step_id = %step.id, total_cost = run.total_cost, "step recorded");
        Ok(run)
    }

    /// Mark the run completed and emit the synthetic final step result
    pub async fn complete_run(
        &self,
        run_id: Uuid,
        aggregate_output: Map<String, Value>,
    ) -> Result<(Run, StepResult)> {
        let run = self
            .patch_with_retry(run_id, |_| {
                Ok(RunPatch::new()
                    .with_status(RunStatus::Completed)
                    .finished_now())
            })
            .await?;

        let final_result = StepResult::synthetic_final(&run, aggregate_output);
        self.store.create_step_result(&final_result).await?;
        info!(run_id = %run.id, total_cost = run.total_cost, "run completed");
        Ok((run, final_result))
    }

    /// Mark the run failed with the given reason
    pub async fn fail_run(&self, run_id: Uuid, reason: &str) -> Result<Run> {
        let reason_owned = reason.to_string();
        let run = self
            .patch_with_retry(run_id, move |_| {
                Ok(RunPatch::new()
                    .with_status(RunStatus::Failed)
                    .with_failure_reason(reason_owned.clone())
                    .finished_now())
            })
            .await?;
        info!(run_id = %run.id, reason, "run failed");
        Ok(run)
    }

    /// Mark the run cancelled
    ///
    /// Fails with `RunTerminal` when the run already finished, so the
    /// caller knows the cancellation did not take effect.
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<Run> {
        let run = self
            .patch_with_retry(run_id, |_| {
                Ok(RunPatch::new()
                    .with_status(RunStatus::Cancelled)
                    .finished_now())
            })
            .await?;
        info!(run_id = %run.id, "run cancelled");
        Ok(run)
    }

    /// Fresh-read / conditional-write loop with bounded retries
    async fn patch_with_retry<F>(&self, run_id: Uuid, make_patch: F) -> Result<Run>
    where
        F: Fn(&Run) -> Result<RunPatch>,
    {
        for attempt in 1..=self.max_retries {
            let run = self.store.get_run(run_id).await?;
            let patch = make_patch(&run)?;
            match self.store.update_run(run_id, run.version, patch).await {
                Ok(updated) => return Ok(updated),
                Err(Error::VersionConflict(_)) if attempt < self.max_retries => {
                    debug!(run_id = %run_id, attempt, "run update lost conditional write, re-reading");
                }
                Err(Error::VersionConflict(_)) => {
                    return Err(Error::AggregationConflict(run_id));
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::AggregationConflict(run_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryMode, RunKind};
    use crate::store::{MemoryRecordStore, StepOutcome};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store wrapper that loses the first `conflicts` conditional writes
    struct ContendedStore {
        inner: MemoryRecordStore,
        conflicts: u32,
        seen: AtomicU32,
    }

    #[async_trait::async_trait]
    impl RecordStore for ContendedStore {
        async fn create_run(&self, run: &Run) -> Result<()> {
            self.inner.create_run(run).await
        }

        async fn get_run(&self, id: Uuid) -> Result<Run> {
            self.inner.get_run(id).await
        }

        async fn update_run(&self, id: Uuid, expected_version: i64, patch: RunPatch) -> Result<Run> {
            if self.seen.fetch_add(1, Ordering::SeqCst) < self.conflicts {
                return Err(Error::VersionConflict(id));
            }
            self.inner.update_run(id, expected_version, patch).await
        }

        async fn create_step_result(&self, record: &StepResult) -> Result<()> {
            self.inner.create_step_result(record).await
        }

        async fn get_step_result(&self, id: Uuid) -> Result<StepResult> {
            self.inner.get_step_result(id).await
        }

        async fn find_step_by_external_ref(
            &self,
            external_ref: &str,
        ) -> Result<Option<StepResult>> {
            self.inner.find_step_by_external_ref(external_ref).await
        }

        async fn attach_external_ref(&self, id: Uuid, external_ref: &str) -> Result<()> {
            self.inner.attach_external_ref(id, external_ref).await
        }

        async fn complete_step_result(&self, id: Uuid, outcome: StepOutcome) -> Result<StepResult> {
            self.inner.complete_step_result(id, outcome).await
        }

        async fn list_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>> {
            self.inner.list_step_results(run_id).await
        }

        fn name(&self) -> &str {
            "contended"
        }
    }

    fn terminal_step(run_id: Uuid, index: u32, cost: f64) -> StepResult {
        let mut step = StepResult::new(run_id, index, "txt2img", DeliveryMode::Immediate);
        step.cost = cost;
        step
    }

    #[tokio::test]
    async fn test_record_step_appends_and_accumulates() {
        let store = Arc::new(MemoryRecordStore::new());
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let aggregator = RunAggregator::new(store, 3);

        let first = terminal_step(run.id, 0, 2.0);
        let second = terminal_step(run.id, 1, 3.5);
        aggregator.record_step(run.id, &first).await.unwrap();
        let updated = aggregator.record_step(run.id, &second).await.unwrap();

        assert_eq!(updated.step_result_ids, vec![first.id, second.id]);
        assert_eq!(updated.total_cost, 5.5);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_with_fresh_reads() {
        let store = Arc::new(ContendedStore {
            inner: MemoryRecordStore::new(),
            conflicts: 2,
            seen: AtomicU32::new(0),
        });
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let aggregator = RunAggregator::new(store, 3);
        let step = terminal_step(run.id, 0, 1.0);
        let updated = aggregator.record_step(run.id, &step).await.unwrap();
        assert_eq!(updated.total_cost, 1.0);
    }

    #[tokio::test]
    async fn test_exhausted_conflicts_surface_aggregation_error() {
        let store = Arc::new(ContendedStore {
            inner: MemoryRecordStore::new(),
            conflicts: u32::MAX,
            seen: AtomicU32::new(0),
        });
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let aggregator = RunAggregator::new(store, 3);
        let step = terminal_step(run.id, 0, 1.0);
        let err = aggregator.record_step(run.id, &step).await.unwrap_err();
        assert!(matches!(err, Error::AggregationConflict(_)));
    }

    #[tokio::test]
    async fn test_record_step_on_terminal_run_is_rejected() {
        let store = Arc::new(MemoryRecordStore::new());
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let aggregator = RunAggregator::new(store.clone(), 3);
        aggregator.cancel_run(run.id).await.unwrap();

        let step = terminal_step(run.id, 0, 2.0);
        let err = aggregator.record_step(run.id, &step).await.unwrap_err();
        assert!(matches!(
            err,
            Error::RunTerminal {
                status: RunStatus::Cancelled,
                ..
            }
        ));

        let reloaded = store.get_run(run.id).await.unwrap();
        assert_eq!(reloaded.total_cost, 0.0);
        assert!(reloaded.step_result_ids.is_empty());
    }

    #[tokio::test]
    async fn test_complete_run_emits_synthetic_final() {
        let store = Arc::new(MemoryRecordStore::new());
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let aggregator = RunAggregator::new(store.clone(), 3);
        let step = terminal_step(run.id, 0, 2.0);
        aggregator.record_step(run.id, &step).await.unwrap();

        let mut aggregate = Map::new();
        aggregate.insert("input_image".to_string(), serde_json::json!("img.png"));
        let (completed, final_result) = aggregator.complete_run(run.id, aggregate).await.unwrap();

        assert_eq!(completed.status, RunStatus::Completed);
        assert!(final_result.is_synthetic_final());
        // The synthetic record is emitted, not appended to the step list.
        assert_eq!(completed.step_result_ids, vec![step.id]);

        // Double finalization is rejected by the status guard.
        let err = aggregator.complete_run(run.id, Map::new()).await.unwrap_err();
        assert!(matches!(err, Error::RunTerminal { .. }));
    }

    #[tokio::test]
    async fn test_negative_cost_is_clamped() {
        let store = Arc::new(MemoryRecordStore::new());
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let aggregator = RunAggregator::new(store, 3);
        let step = terminal_step(run.id, 0, -4.0);
        let updated = aggregator.record_step(run.id, &step).await.unwrap();
        assert_eq!(updated.total_cost, 0.0);
    }
}
