//! Notifier - the seam to platform delivery
//!
//! The coordinator guarantees exactly one terminal notification per run;
//! how that becomes a Telegram reply, a Discord message, or a websocket
//! frame is the notification layer's business, behind this trait.

use crate::error::Result;
use crate::model::{Run, StepResult};
use tracing::info;

/// Callback invoked when a run reaches a terminal status
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    /// The run completed; `final_result` is the synthetic aggregate record
    async fn run_completed(&self, run: &Run, final_result: &StepResult) -> Result<()>;

    /// The run failed
    async fn run_failed(&self, run: &Run, reason: &str) -> Result<()>;

    /// The run was cancelled
    async fn run_cancelled(&self, run: &Run) -> Result<()>;
}

/// Notifier that only writes to the log
///
/// Useful as a default and in tests; real deployments wire in a platform
/// dispatcher.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn run_completed(&self, run: &Run, final_result: &StepResult) -> Result<()> {
        info!(
            run_id = %run.id,
            initiator = %run.initiator_id,
            total_cost = run.total_cost,
            final_step_id = %final_result.id,
            "run completed"
        );
        Ok(())
    }

    async fn run_failed(&self, run: &Run, reason: &str) -> Result<()> {
        info!(run_id = %run.id, initiator = %run.initiator_id, reason, "run failed");
        Ok(())
    }

    async fn run_cancelled(&self, run: &Run) -> Result<()> {
        info!(run_id = %run.id, initiator = %run.initiator_id, "run cancelled");
        Ok(())
    }
}
