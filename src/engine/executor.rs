// src/engine/executor.rs

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use crate::action::ActionContext;
use crate::dag::{DependencyGraph, StatusTable, UnitStatus};
use crate::engine::run::{FirstFailure, PipelineRun, RunOutcome, UnitReport};
use crate::engine::{EngineOptions, RunContext};
use crate::errors::Result;

/// Walks a dependency graph and runs each unit's action at most once.
///
/// The engine is stateless between runs; every call to [`run_with`] gets its
/// own status table, so one engine can be shared by many pipelines running
/// concurrently.
///
/// [`run_with`]: ExecutionEngine::run_with
#[derive(Debug, Clone, Default)]
pub struct ExecutionEngine {
    options: EngineOptions,
}

impl ExecutionEngine {
    pub fn new(options: EngineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run `graph` with a default context (no pipeline name, run id 0, empty
    /// environment, not cancellable).
    pub async fn run(&self, graph: DependencyGraph) -> Result<PipelineRun> {
        self.run_with(graph, RunContext::default()).await
    }

    /// Validate and execute `graph`.
    ///
    /// - A validation error is returned before any action is invoked.
    /// - Eligible units (all dependencies `Succeeded`) run concurrently, up
    ///   to `max_parallel` at a time, dispatched in insertion order.
    /// - A failing action marks its unit `Failed` and every pending unit
    ///   downstream of it `Skipped`. Independent branches keep running.
    /// - On cancellation no new actions are started; in-flight actions finish
    ///   and are recorded, everything else becomes `Skipped`.
    pub async fn run_with(&self, graph: DependencyGraph, ctx: RunContext) -> Result<PipelineRun> {
        if let Err(err) = graph.validate() {
            warn!(
                pipeline = %ctx.pipeline,
                run_id = ctx.run_id,
                error = %err,
                "graph validation failed; no units will run"
            );
            return Err(err);
        }

        Ok(self.execute(graph, ctx).await)
    }

    /// Execute a graph the caller has already validated.
    ///
    /// Validation belongs to the engine; only callers that must validate
    /// earlier (the trigger supervisor, before assigning a run id) use this.
    pub(crate) async fn execute(&self, graph: DependencyGraph, ctx: RunContext) -> PipelineRun {
        let graph = Arc::new(graph);
        let started_at = Utc::now();
        let max_parallel = self.options.max_parallel.max(1);

        let mut table = StatusTable::new(&graph);
        let mut errors: Vec<Option<String>> = vec![None; graph.len()];
        let mut first_failure: Option<FirstFailure> = None;
        let mut in_flight: JoinSet<anyhow::Result<()>> = JoinSet::new();
        // Kept outside the tasks so a panicking action still maps to its unit.
        let mut unit_of: HashMap<Id, usize> = HashMap::new();

        let mut cancel = ctx.cancel.clone();
        let mut cancelled = is_cancelled(&cancel);

        info!(
            pipeline = %ctx.pipeline,
            run_id = ctx.run_id,
            units = graph.len(),
            "starting pipeline run"
        );

        loop {
            if !cancelled {
                let capacity = max_parallel.saturating_sub(in_flight.len());
                for idx in table.collect_ready(capacity) {
                    let unit = graph.unit_at(idx);
                    let action = Arc::clone(unit.action());
                    let action_ctx = ActionContext {
                        pipeline: ctx.pipeline.clone(),
                        run_id: ctx.run_id,
                        unit: unit.id().to_string(),
                        env: ctx.env.clone(),
                    };

                    info!(
                        pipeline = %ctx.pipeline,
                        run_id = ctx.run_id,
                        unit = %unit.id(),
                        "dependencies satisfied; invoking action"
                    );

                    let task = in_flight.spawn(async move { action.run(action_ctx).await });
                    unit_of.insert(task.id(), idx);
                }
            }

            if in_flight.is_empty() {
                break;
            }

            let joined = tokio::select! {
                joined = in_flight.join_next_with_id() => joined,
                _ = cancellation(&mut cancel), if !cancelled => {
                    cancelled = true;
                    info!(
                        pipeline = %ctx.pipeline,
                        run_id = ctx.run_id,
                        in_flight = in_flight.len(),
                        "cancellation observed; letting in-flight actions finish"
                    );
                    continue;
                }
            };

            let Some(joined) = joined else {
                break;
            };

            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(join_err) => (join_err.id(), Err(anyhow!("action aborted: {join_err}"))),
            };
            let Some(idx) = unit_of.remove(&id) else {
                warn!(task = %id, "finished task does not belong to any unit");
                continue;
            };

            let unit_id = graph.unit_at(idx).id();
            match result {
                Ok(()) => {
                    table.transition(idx, UnitStatus::Succeeded);
                    info!(
                        pipeline = %ctx.pipeline,
                        run_id = ctx.run_id,
                        unit = %unit_id,
                        "unit succeeded"
                    );
                }
                Err(err) => {
                    let message = format!("{err:#}");
                    table.transition(idx, UnitStatus::Failed);
                    warn!(
                        pipeline = %ctx.pipeline,
                        run_id = ctx.run_id,
                        unit = %unit_id,
                        error = %message,
                        "unit failed; skipping its dependents"
                    );

                    if first_failure.is_none() {
                        first_failure = Some(FirstFailure {
                            unit: unit_id.to_string(),
                            error: message.clone(),
                        });
                    }
                    errors[idx] = Some(message);

                    for skipped in table.skip_dependents_of(idx) {
                        debug!(
                            pipeline = %ctx.pipeline,
                            run_id = ctx.run_id,
                            unit = %graph.unit_at(skipped).id(),
                            upstream = %unit_id,
                            "unit skipped because an upstream unit failed"
                        );
                    }
                }
            }
        }

        let leftover = table.skip_all_pending();
        if !leftover.is_empty() && !cancelled {
            warn!(
                pipeline = %ctx.pipeline,
                run_id = ctx.run_id,
                count = leftover.len(),
                "units left pending at end of run; marking Skipped"
            );
        }

        let outcome = if table.all_succeeded() {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };

        let statuses = table.into_statuses();
        let units = graph
            .units()
            .zip(statuses)
            .zip(errors)
            .map(|((unit, status), error)| UnitReport {
                id: unit.id().to_string(),
                status,
                error,
            })
            .collect();

        let finished_at = Utc::now();
        info!(
            pipeline = %ctx.pipeline,
            run_id = ctx.run_id,
            outcome = %outcome,
            cancelled,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "pipeline run finished"
        );

        PipelineRun {
            pipeline: ctx.pipeline,
            run_id: ctx.run_id,
            graph,
            started_at,
            finished_at,
            outcome,
            units,
            first_failure,
            cancelled,
        }
    }
}

fn is_cancelled(cancel: &Option<watch::Receiver<bool>>) -> bool {
    cancel.as_ref().is_some_and(|rx| *rx.borrow())
}

/// Resolves once cancellation is requested. Never resolves if there is no
/// cancellation channel or its sender is gone.
async fn cancellation(cancel: &mut Option<watch::Receiver<bool>>) {
    match cancel {
        Some(rx) => loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        },
        None => std::future::pending::<()>().await,
    }
}
