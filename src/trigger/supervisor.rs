// src/trigger/supervisor.rs

//! Async shell around [`SupervisorCore`].
//!
//! Every registered pipeline gets one supervisor task. It owns the pipeline's
//! template, receives fires over an unbounded channel, and runs at most one
//! [`PipelineRun`] at a time on its own Tokio task.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::ActionEnv;
use crate::engine::{ExecutionEngine, PipelineRun, RunContext};
use crate::errors::{PipedagError, Result};
use crate::template::GraphTemplate;
use crate::trigger::FireReason;
use crate::trigger::core::{RejectReason, SupervisorCommand, SupervisorCore, SupervisorEvent};
use crate::types::OverlapBehaviour;

/// Channel on which a caller waits for the run its fire produced.
pub type RunReply = oneshot::Sender<Result<PipelineRun>>;

/// A fire waiting to become a run.
pub struct PendingFire {
    pub reason: FireReason,
    pub reply: Option<RunReply>,
}

impl fmt::Debug for PendingFire {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingFire")
            .field("reason", &self.reason)
            .field("awaited", &self.reply.is_some())
            .finish()
    }
}

#[derive(Debug)]
enum SupervisorMsg {
    Fire(PendingFire),
    Cancel,
}

/// Outcome of one fire, published on the trigger layer's report channel.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub pipeline: String,
    pub reason: FireReason,
    pub result: ReportResult,
}

#[derive(Debug, Clone)]
pub enum ReportResult {
    /// The graph was instantiated and the engine ran it.
    Completed(PipelineRun),
    /// No run was created (resolution or graph error).
    NotStarted(String),
}

/// Cheap, cloneable sender side of a supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    pipeline: Arc<str>,
    tx: mpsc::UnboundedSender<SupervisorMsg>,
}

impl SupervisorHandle {
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Fire without waiting for the run.
    pub fn fire(&self, reason: FireReason) -> Result<()> {
        self.send(SupervisorMsg::Fire(PendingFire { reason, reply: None }))
    }

    /// Fire and wait for the resulting run.
    pub async fn fire_and_wait(&self, reason: FireReason) -> Result<PipelineRun> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorMsg::Fire(PendingFire {
            reason,
            reply: Some(reply),
        }))?;

        rx.await.map_err(|_| PipedagError::FireDropped {
            pipeline: self.pipeline.to_string(),
            reason: "supervisor stopped before the run finished".to_string(),
        })?
    }

    /// Ask the supervisor to stop. The active run, if any, stops starting
    /// new units and is reported as cancelled.
    pub fn cancel(&self) {
        // A closed channel means the supervisor has already exited.
        let _ = self.tx.send(SupervisorMsg::Cancel);
    }

    fn send(&self, msg: SupervisorMsg) -> Result<()> {
        self.tx
            .send(msg)
            .map_err(|_| PipedagError::PipelineNotFound(self.pipeline.to_string()))
    }
}

/// Shared, per-layer state handed to each supervisor.
#[derive(Clone)]
pub struct SupervisorDeps {
    pub engine: Arc<ExecutionEngine>,
    pub env: ActionEnv,
    pub run_ids: Arc<AtomicU64>,
    pub reports: Option<mpsc::UnboundedSender<RunReport>>,
}

struct ActiveRun {
    reason: FireReason,
    reply: Option<RunReply>,
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<PipelineRun>>,
}

/// Start a supervisor task for one pipeline.
pub fn spawn_supervisor(
    template: Arc<dyn GraphTemplate>,
    overlap: OverlapBehaviour,
    queue_length: usize,
    deps: SupervisorDeps,
) -> (SupervisorHandle, JoinHandle<()>) {
    let pipeline: Arc<str> = Arc::from(template.name());
    let (tx, rx) = mpsc::unbounded_channel();

    let supervisor = Supervisor {
        core: SupervisorCore::new(pipeline.to_string(), overlap, queue_length),
        template,
        deps,
        inbox: rx,
    };
    let join = tokio::spawn(supervisor.run());

    (SupervisorHandle { pipeline, tx }, join)
}

struct Supervisor {
    core: SupervisorCore<PendingFire>,
    template: Arc<dyn GraphTemplate>,
    deps: SupervisorDeps,
    inbox: mpsc::UnboundedReceiver<SupervisorMsg>,
}

impl Supervisor {
    async fn run(mut self) {
        let pipeline = self.core.pipeline().to_string();
        debug!(pipeline = %pipeline, "supervisor started");

        let mut active: Option<ActiveRun> = None;
        let mut inbox_open = true;

        loop {
            let event = tokio::select! {
                msg = self.inbox.recv(), if inbox_open => match msg {
                    Some(SupervisorMsg::Fire(fire)) => SupervisorEvent::Fire(fire),
                    Some(SupervisorMsg::Cancel) => SupervisorEvent::Cancel,
                    None => {
                        inbox_open = false;
                        SupervisorEvent::Cancel
                    }
                },
                joined = join_active(&mut active) => {
                    if let Some(run) = active.take() {
                        self.finish(run, joined);
                    }
                    SupervisorEvent::RunFinished
                }
            };

            if matches!(event, SupervisorEvent::Cancel) {
                if let Some(run) = active.as_ref() {
                    let _ = run.cancel.send(true);
                }
            }

            let mut exit = false;
            for command in self.core.step(event) {
                match command {
                    SupervisorCommand::StartRun(fire) => active = Some(self.start(fire)),
                    SupervisorCommand::Reject(fire, reason) => self.reject(fire, reason),
                    SupervisorCommand::Exit => exit = true,
                }
            }

            if exit {
                break;
            }
        }

        debug!(pipeline = %pipeline, "supervisor stopped");
    }

    fn start(&self, fire: PendingFire) -> ActiveRun {
        let template = Arc::clone(&self.template);
        let engine = Arc::clone(&self.deps.engine);
        let run_ids = Arc::clone(&self.deps.run_ids);
        let env = self.deps.env.clone();
        let (cancel, cancel_rx) = watch::channel(false);
        let reason = fire.reason;

        info!(pipeline = %template.name(), reason = %reason, "fire accepted; instantiating graph");

        let task = tokio::spawn(async move {
            // Validated here rather than by the engine so a graph that can
            // never run does not consume a run id.
            let graph = template.instantiate().await?;
            graph.validate()?;

            let run_id = run_ids.fetch_add(1, Ordering::SeqCst) + 1;
            let ctx = RunContext::new(template.name(), run_id)
                .with_env(env)
                .with_cancel(cancel_rx);
            Ok::<_, PipedagError>(engine.execute(graph, ctx).await)
        });

        ActiveRun {
            reason,
            reply: fire.reply,
            cancel,
            task,
        }
    }

    fn finish(
        &self,
        run: ActiveRun,
        joined: std::result::Result<Result<PipelineRun>, tokio::task::JoinError>,
    ) {
        let pipeline = self.core.pipeline();
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => Err(PipedagError::Other(anyhow!("run task aborted: {join_err}"))),
        };

        let report = match &result {
            Ok(pipeline_run) => {
                if pipeline_run.succeeded() {
                    info!(pipeline, run_id = pipeline_run.run_id, "run succeeded");
                } else {
                    warn!(
                        pipeline,
                        run_id = pipeline_run.run_id,
                        first_failure = ?pipeline_run.first_failure.as_ref().map(|f| &f.unit),
                        cancelled = pipeline_run.cancelled,
                        "run failed"
                    );
                }
                ReportResult::Completed(pipeline_run.clone())
            }
            Err(err) => {
                warn!(pipeline, reason = %run.reason, error = %err, "fire did not produce a run");
                ReportResult::NotStarted(err.to_string())
            }
        };

        if let Some(reports) = &self.deps.reports {
            let _ = reports.send(RunReport {
                pipeline: pipeline.to_string(),
                reason: run.reason,
                result: report,
            });
        }

        if let Some(reply) = run.reply {
            let _ = reply.send(result);
        }
    }

    fn reject(&self, fire: PendingFire, reason: RejectReason) {
        let pipeline = self.core.pipeline();
        debug!(pipeline, fire = %fire.reason, %reason, "fire dropped");

        if let Some(reply) = fire.reply {
            let _ = reply.send(Err(PipedagError::FireDropped {
                pipeline: pipeline.to_string(),
                reason: reason.to_string(),
            }));
        }
    }
}

/// Wait for the active run's task. Never resolves while idle.
async fn join_active(
    active: &mut Option<ActiveRun>,
) -> std::result::Result<Result<PipelineRun>, tokio::task::JoinError> {
    match active {
        Some(run) => (&mut run.task).await,
        None => std::future::pending().await,
    }
}
