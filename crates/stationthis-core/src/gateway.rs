//! Gateway - step submission to the external execution engine
//!
//! The gateway owns the only retry policy on the dispatch side: bounded
//! attempts with exponential backoff around the submission call itself.
//! Exactly one step-result record is created before anything is sent, so a
//! step that never reaches the engine is still auditable. Raw engine
//! responses are normalized here, before they ever reach the reconciler.

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::model::StepResult;
use crate::store::{RecordStore, StepOutcome};
use crate::tools::ToolDefinition;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Reply from a submission call
#[derive(Debug, Clone)]
pub enum Submission {
    /// The tool ran synchronously; the result is already here
    Immediate {
        /// Raw output payload
        output: Value,
        /// Cost delta in points
        cost: f64,
        /// Execution duration in milliseconds
        duration_ms: i64,
    },
    /// The engine accepted the job; completion arrives out-of-band
    Pending {
        /// Engine reference the completion signal will carry
        external_ref: String,
    },
}

/// The external execution engine boundary
///
/// Implementations should return [`Error::Engine`] for transient submission
/// failures (network, engine validation); those are the only errors the
/// gateway retries.
#[async_trait::async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Submit a tool invocation with fully resolved inputs
    async fn submit(&self, tool_id: &str, inputs: &Map<String, Value>) -> Result<Submission>;

    /// Engine name, for logging
    fn name(&self) -> &str {
        "engine"
    }
}

/// Outcome of dispatching one step
#[derive(Debug)]
pub enum Dispatch {
    /// The step already reached a terminal status (immediate tool, or a
    /// submission that exhausted its retries)
    Completed(StepResult),
    /// The step is pending a webhook completion signal
    Suspended(StepResult),
}

/// Submits steps to the execution engine and records the attempt
pub struct InvocationGateway {
    engine: Arc<dyn ExecutionEngine>,
    store: Arc<dyn RecordStore>,
    config: CoordinatorConfig,
}

impl InvocationGateway {
    /// Create a gateway
    #[must_use]
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn RecordStore>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            engine,
            store,
            config,
        }
    }

    /// Dispatch one step: create its record, submit, and terminalize or
    /// suspend it
    ///
    /// Submission failures never bubble as errors from here — the step
    /// result is marked `failed` and returned, so the failure flows through
    /// the same reconciliation path as every other completion.
    #[instrument(skip(self, tool, inputs), fields(run_id = %run_id, step_index, tool_id = %tool.id))]
    pub async fn dispatch(
        &self,
        run_id: Uuid,
        step_index: u32,
        tool: &ToolDefinition,
        inputs: Map<String, Value>,
    ) -> Result<Dispatch> {
        let record = StepResult::new(run_id, step_index, &tool.id, tool.delivery)
            .with_inputs(inputs.clone());
        self.store.create_step_result(&record).await?;

        match self.submit_with_retry(&tool.id, &inputs).await {
            Ok(Submission::Immediate {
                output,
                cost,
                duration_ms,
            }) => {
                let normalized = tool.output_contract.normalize(&output);
                let done = self
                    .store
                    .complete_step_result(
                        record.id,
                        StepOutcome::Success {
                            raw: output,
                            output: normalized,
                            cost,
                            duration_ms: Some(duration_ms),
                        },
                    )
                    .await?;
                debug!(step_id = %done.id, cost, "immediate step completed");
                Ok(Dispatch::Completed(done))
            }
            Ok(Submission::Pending { external_ref }) => {
                self.store
                    .attach_external_ref(record.id, &external_ref)
                    .await?;
                let pending = self.store.get_step_result(record.id).await?;
                debug!(step_id = %pending.id, external_ref, "step suspended awaiting completion");
                Ok(Dispatch::Suspended(pending))
            }
            Err(Error::Invocation { attempts, message }) => {
                let failed = self
                    .store
                    .complete_step_result(
                        record.id,
                        StepOutcome::Failed {
                            error: format!("{message} (after {attempts} attempt(s))"),
                            cost: 0.0,
                        },
                    )
                    .await?;
                warn!(step_id = %failed.id, attempts, "submission exhausted retries");
                Ok(Dispatch::Completed(failed))
            }
            Err(e) => Err(e),
        }
    }

    /// Submit with bounded attempts; only `Error::Engine` is retried
    async fn submit_with_retry(
        &self,
        tool_id: &str,
        inputs: &Map<String, Value>,
    ) -> Result<Submission> {
        let max_attempts = self.config.max_submit_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.engine.submit(tool_id, inputs).await {
                Ok(submission) => {
                    if attempt > 1 {
                        debug!(attempt, tool_id, "submission succeeded after retry");
                    }
                    return Ok(submission);
                }
                Err(Error::Engine(message)) => {
                    if attempt == max_attempts {
                        return Err(Error::Invocation {
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.config.submit_delay(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        tool_id,
                        error = %message,
                        "submission failed, retrying"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::Invocation {
            attempts: max_attempts,
            message: "no submission attempt was made".to_string(),
        })
    }
}
