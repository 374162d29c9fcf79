//! Coordinator - drives spell/cook runs through their steps
//!
//! A run proceeds strictly sequentially: resolve inputs, check for
//! cancellation, dispatch, and either continue inline (immediate tools) or
//! suspend until a completion signal arrives (webhook tools). Nothing about
//! a run's position is held in memory across the suspension — the signal
//! may be handled by a different process instance, so the context and the
//! cursor are rebuilt from persisted run and step-result records.

use crate::aggregator::RunAggregator;
use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::gateway::{Dispatch, ExecutionEngine, InvocationGateway};
use crate::model::{CompletionSignal, PipelineContext, Run, SpellDefinition, StepStatus};
use crate::notify::Notifier;
use crate::reconciler::CompletionReconciler;
use crate::resolver::resolve_step_inputs;
use crate::spellbook::SpellBook;
use crate::store::{RecordStore, StepOutcome};
use crate::tools::ToolRegistry;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// The spell/cook execution coordinator
pub struct Coordinator {
    store: Arc<dyn RecordStore>,
    registry: Arc<ToolRegistry>,
    spellbook: Arc<SpellBook>,
    notifier: Arc<dyn Notifier>,
    gateway: InvocationGateway,
    reconciler: CompletionReconciler,
    aggregator: RunAggregator,
}

impl Coordinator {
    /// Create a coordinator wired to its collaborators
    #[must_use]
    pub fn new(
        engine: Arc<dyn ExecutionEngine>,
        store: Arc<dyn RecordStore>,
        registry: Arc<ToolRegistry>,
        spellbook: Arc<SpellBook>,
        notifier: Arc<dyn Notifier>,
        config: CoordinatorConfig,
    ) -> Self {
        let gateway = InvocationGateway::new(engine, store.clone(), config.clone());
        let reconciler = CompletionReconciler::new(store.clone());
        let aggregator = RunAggregator::new(store.clone(), config.max_aggregation_retries);
        Self {
            store,
            registry,
            spellbook,
            notifier,
            gateway,
            reconciler,
            aggregator,
        }
    }

    /// Start a run of the given definition and drive it until it suspends
    /// or reaches a terminal status
    ///
    /// Authoring defects ([`Error::Definition`], unknown tools) surface to
    /// the caller; invocation failures do not — they are recorded on the
    /// run and reported through the notifier.
    #[instrument(skip(self, initial_context))]
    pub async fn start_run(
        &self,
        definition_id: &str,
        initiator_id: &str,
        initial_context: Map<String, Value>,
    ) -> Result<Uuid> {
        let definition = self.spellbook.require(definition_id).await?;
        if definition.is_empty() {
            return Err(Error::Definition(format!(
                "definition '{definition_id}' has no steps"
            )));
        }

        let run = Run::new(definition_id, initiator_id, definition.kind)
            .with_initial_context(initial_context.clone());
        self.store.create_run(&run).await?;
        info!(run_id = %run.id, steps = definition.len(), "run started");

        let context = PipelineContext::from_map(initial_context);
        self.advance(run.id, &definition, 0, context).await?;
        Ok(run.id)
    }

    /// Entry point for out-of-band completion signals (webhook callbacks)
    ///
    /// Idempotent: a signal for an already-terminal step result changes
    /// nothing and returns `Ok`.
    #[instrument(skip(self, signal), fields(external_ref = %signal.external_ref))]
    pub async fn handle_completion(&self, signal: CompletionSignal) -> Result<()> {
        let Some(record) = self
            .store
            .find_step_by_external_ref(&signal.external_ref)
            .await?
        else {
            warn!("completion signal references no known step");
            return Err(Error::StepNotFound(signal.external_ref));
        };

        if record.status.is_terminal() {
            debug!(step_id = %record.id, "duplicate completion signal ignored");
            return Ok(());
        }

        let outcome = if signal.success {
            let tool = self.registry.require(&record.tool_id)?;
            let normalized = tool.output_contract.normalize(&signal.output);
            StepOutcome::Success {
                raw: signal.output.clone(),
                output: normalized,
                cost: signal.cost,
                duration_ms: signal.duration_ms,
            }
        } else {
            StepOutcome::Failed {
                error: signal
                    .error
                    .clone()
                    .unwrap_or_else(|| "execution failed".to_string()),
                cost: signal.cost,
            }
        };

        // Whichever signal wins the compare-and-set reconciles; the rest
        // are duplicates.
        let Some(done) = self.reconciler.terminalize(&record, outcome).await? else {
            return Ok(());
        };

        let run = self.store.get_run(done.run_id).await?;
        if run.status.is_terminal() {
            debug!(
                run_id = %run.id,
                status = %run.status,
                "step completed after run reached terminal status; not advancing"
            );
            return Ok(());
        }

        // A cancellation may land between the status check above and the
        // aggregation write; the terminal run's cost and step list stay
        // frozen and the step record keeps its terminal outcome for audit.
        let run = match self.aggregator.record_step(run.id, &done).await {
            Ok(run) => run,
            Err(Error::RunTerminal { id, status }) => {
                debug!(run_id = %id, %status, "run reached terminal status before aggregation");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if done.status == StepStatus::Failed {
            let reason = done
                .error
                .clone()
                .unwrap_or_else(|| "step failed".to_string());
            let failed = self.aggregator.fail_run(run.id, &reason).await?;
            self.notify_failed(&failed, &reason).await;
            return Ok(());
        }

        let definition = self.spellbook.require(&run.definition_id).await?;
        let context = self.rebuild_context(&run, &definition).await?;
        self.advance(run.id, &definition, done.step_index + 1, context)
            .await
    }

    /// Cancel a run
    ///
    /// Best-effort: an in-flight dispatch cannot be aborted, but no further
    /// step will be dispatched into the run. Fails with [`Error::RunTerminal`]
    /// when the run already finished.
    #[instrument(skip(self))]
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<Run> {
        let run = self.aggregator.cancel_run(run_id).await?;
        if let Err(e) = self.notifier.run_cancelled(&run).await {
            warn!(run_id = %run.id, error = %e, "cancellation notification failed");
        }
        Ok(run)
    }

    /// Dispatch steps from `start_index` until suspension, failure, or the
    /// end of the definition
    async fn advance(
        &self,
        run_id: Uuid,
        definition: &SpellDefinition,
        start_index: u32,
        mut context: PipelineContext,
    ) -> Result<()> {
        let total = definition.len() as u32;
        let mut index = start_index;

        while index < total {
            // Fresh read before every dispatch: a cancellation may have
            // landed while the previous step ran.
            let run = self.store.get_run(run_id).await?;
            if run.status.is_terminal() {
                debug!(run_id = %run_id, status = %run.status, "run is terminal, not dispatching");
                return Ok(());
            }

            let step_def = &definition.steps[index as usize];
            let tool = match self.registry.require(&step_def.tool_id) {
                Ok(tool) => tool,
                Err(e) => {
                    self.abort_run(run_id, &e.to_string()).await;
                    return Err(e);
                }
            };

            let inputs = match resolve_step_inputs(tool, step_def, &context) {
                Ok(inputs) => inputs,
                Err(e) => {
                    self.abort_run(run_id, &e.to_string()).await;
                    return Err(e);
                }
            };

            match self.gateway.dispatch(run_id, index, tool, inputs).await? {
                Dispatch::Suspended(pending) => {
                    debug!(run_id = %run_id, step_id = %pending.id, "run suspended awaiting completion signal");
                    return Ok(());
                }
                Dispatch::Completed(done) => {
                    match self.aggregator.record_step(run_id, &done).await {
                        Ok(_) => {}
                        Err(Error::RunTerminal { id, status }) => {
                            debug!(run_id = %id, %status, "run reached terminal status before aggregation");
                            return Ok(());
                        }
                        Err(e) => return Err(e),
                    }

                    if done.status == StepStatus::Failed {
                        let reason = done
                            .error
                            .clone()
                            .unwrap_or_else(|| "step failed".to_string());
                        let failed = self.aggregator.fail_run(run_id, &reason).await?;
                        self.notify_failed(&failed, &reason).await;
                        return Ok(());
                    }

                    if let Some(output) = &done.output {
                        context.merge(CompletionReconciler::fold_output(step_def, output));
                    }
                    index += 1;
                }
            }
        }

        self.finalize(run_id, context).await
    }

    /// Mark the run completed and emit exactly one terminal notification
    async fn finalize(&self, run_id: Uuid, context: PipelineContext) -> Result<()> {
        let (run, final_result) = match self
            .aggregator
            .complete_run(run_id, context.into_map())
            .await
        {
            Ok(pair) => pair,
            Err(Error::RunTerminal { id, status }) => {
                // A cancellation raced the last completion and won.
                debug!(run_id = %id, %status, "run already terminal, skipping finalization");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = self.notifier.run_completed(&run, &final_result).await {
            warn!(run_id = %run.id, error = %e, "completion notification failed");
        }
        Ok(())
    }

    /// Rebuild the pipeline context from persisted records
    ///
    /// Initial context keys first, then each successful step's folded
    /// output in step order.
    async fn rebuild_context(
        &self,
        run: &Run,
        definition: &SpellDefinition,
    ) -> Result<PipelineContext> {
        let mut context = PipelineContext::from_map(run.initial_context.clone());

        let mut steps = self.store.list_step_results(run.id).await?;
        steps.retain(|s| s.status == StepStatus::Success && !s.is_synthetic_final());
        steps.sort_by_key(|s| s.step_index);

        for step in steps {
            let Some(step_def) = definition.steps.get(step.step_index as usize) else {
                continue;
            };
            if let Some(output) = &step.output {
                context.merge(CompletionReconciler::fold_output(step_def, output));
            }
        }
        Ok(context)
    }

    /// Mark the run failed for an authoring defect and notify
    async fn abort_run(&self, run_id: Uuid, reason: &str) {
        match self.aggregator.fail_run(run_id, reason).await {
            Ok(failed) => self.notify_failed(&failed, reason).await,
            Err(e) => warn!(run_id = %run_id, error = %e, "could not mark run failed"),
        }
    }

    async fn notify_failed(&self, run: &Run, reason: &str) {
        if let Err(e) = self.notifier.run_failed(run, reason).await {
            warn!(run_id = %run.id, error = %e, "failure notification failed");
        }
    }
}
