//! In-memory record store
//!
//! Backed by `tokio::sync::RwLock` maps with the same conditional-write
//! semantics as the persistent backends, so coordinator behavior under
//! conflicting writers can be tested without a database.

use super::{RecordStore, RunPatch, StepOutcome};
use crate::error::{Error, Result};
use crate::model::{Run, StepResult, StepStatus};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// In-memory `RecordStore` backend
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    runs: RwLock<HashMap<Uuid, Run>>,
    steps: RwLock<HashMap<Uuid, StepResult>>,
}

impl MemoryRecordStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create_run(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id, run.clone());
        debug!(run_id = %run.id, "created run record");
        Ok(())
    }

    async fn get_run(&self, id: Uuid) -> Result<Run> {
        let runs = self.runs.read().await;
        runs.get(&id).cloned().ok_or(Error::RunNotFound(id))
    }

    async fn update_run(&self, id: Uuid, expected_version: i64, patch: RunPatch) -> Result<Run> {
        let mut runs = self.runs.write().await;
        let run = runs.get_mut(&id).ok_or(Error::RunNotFound(id))?;

        if run.status.is_terminal() {
            return Err(Error::RunTerminal {
                id,
                status: run.status,
            });
        }
        if run.version != expected_version {
            return Err(Error::VersionConflict(id));
        }

        patch.apply_to(run);
        Ok(run.clone())
    }

    async fn create_step_result(&self, record: &StepResult) -> Result<()> {
        let mut steps = self.steps.write().await;
        steps.insert(record.id, record.clone());
        debug!(step_id = %record.id, run_id = %record.run_id, "created step result");
        Ok(())
    }

    async fn get_step_result(&self, id: Uuid) -> Result<StepResult> {
        let steps = self.steps.read().await;
        steps
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::StepNotFound(id.to_string()))
    }

    async fn find_step_by_external_ref(&self, external_ref: &str) -> Result<Option<StepResult>> {
        let steps = self.steps.read().await;
        Ok(steps
            .values()
            .find(|s| s.external_ref.as_deref() == Some(external_ref))
            .cloned())
    }

    async fn attach_external_ref(&self, id: Uuid, external_ref: &str) -> Result<()> {
        let mut steps = self.steps.write().await;
        let record = steps
            .get_mut(&id)
            .ok_or_else(|| Error::StepNotFound(id.to_string()))?;
        if record.status.is_terminal() {
            return Err(Error::StepAlreadyTerminal(id));
        }
        record.external_ref = Some(external_ref.to_string());
        Ok(())
    }

    async fn complete_step_result(&self, id: Uuid, outcome: StepOutcome) -> Result<StepResult> {
        let mut steps = self.steps.write().await;
        let record = steps
            .get_mut(&id)
            .ok_or_else(|| Error::StepNotFound(id.to_string()))?;

        if record.status != StepStatus::Pending {
            return Err(Error::StepAlreadyTerminal(id));
        }

        outcome.apply_to(record);
        Ok(record.clone())
    }

    async fn list_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>> {
        let steps = self.steps.read().await;
        let mut results: Vec<StepResult> = steps
            .values()
            .filter(|s| s.run_id == run_id)
            .cloned()
            .collect();
        results.sort_by_key(|s| s.created_at);
        Ok(results)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeliveryMode, RunKind, RunStatus};
    use serde_json::{json, Map};

    #[tokio::test]
    async fn test_update_run_version_conflict() {
        let store = MemoryRecordStore::new();
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let updated = store
            .update_run(run.id, 0, RunPatch::new().with_cost(1.5))
            .await
            .unwrap();
        assert_eq!(updated.version, 1);
        assert_eq!(updated.total_cost, 1.5);

        // Stale version loses.
        let err = store
            .update_run(run.id, 0, RunPatch::new().with_cost(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::VersionConflict(_)));
    }

    #[tokio::test]
    async fn test_terminal_run_status_is_immutable() {
        let store = MemoryRecordStore::new();
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        let failed = store
            .update_run(
                run.id,
                0,
                RunPatch::new()
                    .with_status(RunStatus::Failed)
                    .with_failure_reason("engine unreachable")
                    .finished_now(),
            )
            .await
            .unwrap();
        assert_eq!(failed.status, RunStatus::Failed);

        let err = store
            .update_run(
                run.id,
                failed.version,
                RunPatch::new().with_status(RunStatus::Completed),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::RunTerminal {
                status: RunStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_terminal_run_rejects_cost_and_step_patches() {
        let store = MemoryRecordStore::new();
        let run = Run::new("spell-1", "user-1", RunKind::Cast);
        store.create_run(&run).await.unwrap();

        store
            .update_run(
                run.id,
                0,
                RunPatch::new()
                    .with_status(RunStatus::Cancelled)
                    .finished_now(),
            )
            .await
            .unwrap();

        let err = store
            .update_run(
                run.id,
                1,
                RunPatch::new().with_cost(2.0).with_step_result(Uuid::new_v4()),
            )
            .await
            .unwrap_err();
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
    async fn test_complete_step_result_exactly_once() {
        let store = MemoryRecordStore::new();
        let record = StepResult::new(Uuid::new_v4(), 0, "txt2img", DeliveryMode::Webhook);
        store.create_step_result(&record).await.unwrap();

        let outcome = StepOutcome::Success {
            raw: json!({"ok": true}),
            output: Map::new(),
            cost: 2.0,
            duration_ms: Some(1200),
        };

        let done = store
            .complete_step_result(record.id, outcome.clone())
            .await
            .unwrap();
        assert_eq!(done.status, StepStatus::Success);
        assert!(done.completed_at.is_some());

        let err = store
            .complete_step_result(record.id, outcome)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StepAlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_find_by_external_ref() {
        let store = MemoryRecordStore::new();
        let record = StepResult::new(Uuid::new_v4(), 0, "txt2img", DeliveryMode::Webhook);
        store.create_step_result(&record).await.unwrap();
        store
            .attach_external_ref(record.id, "comfy-abc123")
            .await
            .unwrap();

        let found = store
            .find_step_by_external_ref("comfy-abc123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, record.id);

        assert!(store
            .find_step_by_external_ref("unknown")
            .await
            .unwrap()
            .is_none());
    }
}
