// src/trigger/layer.rs

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::action::ActionEnv;
use crate::config::model::DEFAULT_POLL_INTERVAL;
use crate::engine::{ExecutionEngine, PipelineRun};
use crate::errors::{PipedagError, Result};
use crate::source::SourceResolver;
use crate::trigger::schedule::{CronSchedule, spawn_cron_ticker};
use crate::trigger::signal::{SignalWatcher, spawn_signal_watcher};
use crate::trigger::supervisor::{RunReport, SupervisorDeps, SupervisorHandle, spawn_supervisor};
use crate::trigger::{FireReason, TriggerConfig, TriggerMode};
use crate::types::OverlapBehaviour;

/// Knobs shared by every registration of a layer.
#[derive(Debug, Clone)]
pub struct TriggerSettings {
    pub overlap: OverlapBehaviour,
    pub queue_length: usize,
    /// How often remote sources are polled.
    pub poll_interval: Duration,
    /// Environment handed to every action of every run.
    pub env: ActionEnv,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            overlap: OverlapBehaviour::default(),
            queue_length: 1,
            poll_interval: DEFAULT_POLL_INTERVAL,
            env: ActionEnv::default(),
        }
    }
}

struct Registration {
    mode: TriggerMode,
    handle: SupervisorHandle,
    supervisor: JoinHandle<()>,
    ticker: Option<JoinHandle<()>>,
    _signal: Option<SignalWatcher>,
}

impl Registration {
    /// Stop feeding fires and ask the supervisor to wind down.
    fn stop(self) -> JoinHandle<()> {
        if let Some(ticker) = self.ticker {
            ticker.abort();
        }
        self.handle.cancel();
        self.supervisor
    }
}

/// Registry of named pipelines and their triggers.
///
/// Unrelated pipelines never wait on each other: each registration runs on
/// its own supervisor task and only shares the engine, which is stateless.
pub struct TriggerLayer {
    engine: Arc<ExecutionEngine>,
    settings: TriggerSettings,
    resolver: Arc<dyn SourceResolver>,
    run_ids: Arc<AtomicU64>,
    reports: mpsc::UnboundedSender<RunReport>,
    pipelines: Mutex<HashMap<String, Registration>>,
}

impl std::fmt::Debug for TriggerLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerLayer")
            .field("settings", &self.settings)
            .field("pipelines", &self.names())
            .finish_non_exhaustive()
    }
}

impl TriggerLayer {
    /// Create a layer. The receiver yields one [`RunReport`] per fire that
    /// reached the supervisor's run slot, whether or not a run was created.
    pub fn new(
        engine: ExecutionEngine,
        settings: TriggerSettings,
        resolver: Arc<dyn SourceResolver>,
    ) -> (Self, mpsc::UnboundedReceiver<RunReport>) {
        let (reports, rx) = mpsc::unbounded_channel();
        let layer = Self {
            engine: Arc::new(engine),
            settings,
            resolver,
            run_ids: Arc::new(AtomicU64::new(0)),
            reports,
            pipelines: Mutex::new(HashMap::new()),
        };
        (layer, rx)
    }

    pub fn settings(&self) -> &TriggerSettings {
        &self.settings
    }

    /// Store a named association between a definition and its trigger.
    ///
    /// - Fails with `DuplicatePipeline` if the name is taken.
    /// - `Cron`: fails with `InvalidSchedule` if the expression does not parse.
    /// - `ExternalSignal`: fails with `InvalidSource` if the descriptor is
    ///   malformed or a local repository is missing.
    /// - `Immediate`: runs once before returning and hands back the run. If
    ///   the graph cannot be instantiated the registration is rolled back and
    ///   the error returned.
    pub async fn register(&self, config: TriggerConfig) -> Result<Option<PipelineRun>> {
        let name = config.name().to_string();
        let immediate = config.mode == TriggerMode::Immediate;
        let handle = {
            let mut pipelines = self.lock();
            if pipelines.contains_key(&name) {
                return Err(PipedagError::DuplicatePipeline(name));
            }

            let schedule = match &config.mode {
                TriggerMode::Cron(expr) => Some(CronSchedule::parse(expr)?),
                TriggerMode::ExternalSignal(source) => {
                    source.validate()?;
                    None
                }
                TriggerMode::Immediate => None,
            };

            let (handle, supervisor) = spawn_supervisor(
                config.target,
                self.settings.overlap,
                self.settings.queue_length,
                self.supervisor_deps(),
            );

            let ticker = schedule.map(|s| spawn_cron_ticker(s, handle.clone()));

            let signal = match &config.mode {
                TriggerMode::ExternalSignal(source) => {
                    let watcher = spawn_signal_watcher(
                        source.clone(),
                        Arc::clone(&self.resolver),
                        self.settings.poll_interval,
                        handle.clone(),
                    );
                    match watcher {
                        Ok(w) => Some(w),
                        Err(err) => {
                            handle.cancel();
                            return Err(err);
                        }
                    }
                }
                _ => None,
            };

            info!(pipeline = %name, mode = %config.mode, "pipeline registered");

            pipelines.insert(
                name.clone(),
                Registration {
                    mode: config.mode,
                    handle: handle.clone(),
                    supervisor,
                    ticker,
                    _signal: signal,
                },
            );
            handle
        };

        if !immediate {
            return Ok(None);
        }

        match handle.fire_and_wait(FireReason::Registration).await {
            Ok(run) => Ok(Some(run)),
            Err(err) => {
                warn!(pipeline = %name, error = %err, "immediate run could not start; rolling back registration");
                if let Err(rollback) = self.deregister(&name).await {
                    debug!(pipeline = %name, error = %rollback, "rollback found nothing to remove");
                }
                Err(err)
            }
        }
    }

    /// Run a registered pipeline now, through its supervisor, and wait for the
    /// run. If a run is already active the request waits in the overlap queue.
    pub async fn invoke(&self, name: &str) -> Result<PipelineRun> {
        self.handle(name)?.fire_and_wait(FireReason::Manual).await
    }

    /// Inject a schedule fire without waiting for the run.
    pub fn fire(&self, name: &str) -> Result<()> {
        self.handle(name)?.fire(FireReason::Schedule)
    }

    /// Inject an external signal without waiting for the run.
    pub fn signal(&self, name: &str) -> Result<()> {
        self.handle(name)?.fire(FireReason::Signal)
    }

    /// Remove a registration. Pending fires are dropped; an active run stops
    /// starting new units and this call returns once it has finished.
    pub async fn deregister(&self, name: &str) -> Result<()> {
        let registration = self
            .lock()
            .remove(name)
            .ok_or_else(|| PipedagError::PipelineNotFound(name.to_string()))?;

        info!(pipeline = %name, "deregistering pipeline");
        registration
            .stop()
            .await
            .map_err(|e| PipedagError::Other(anyhow!("supervisor for '{name}' aborted: {e}")))
    }

    /// Deregister everything and wait for in-flight runs.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, Registration)> = self.lock().drain().collect();
        info!(pipelines = drained.len(), "shutting down trigger layer");

        let joins: Vec<_> = drained
            .into_iter()
            .map(|(name, registration)| (name, registration.stop()))
            .collect();

        for (name, join) in joins {
            if let Err(err) = join.await {
                warn!(pipeline = %name, error = %err, "supervisor did not stop cleanly");
            }
        }
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn mode_of(&self, name: &str) -> Option<TriggerMode> {
        self.lock().get(name).map(|r| r.mode.clone())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    fn handle(&self, name: &str) -> Result<SupervisorHandle> {
        self.lock()
            .get(name)
            .map(|r| r.handle.clone())
            .ok_or_else(|| PipedagError::PipelineNotFound(name.to_string()))
    }

    fn supervisor_deps(&self) -> SupervisorDeps {
        SupervisorDeps {
            engine: Arc::clone(&self.engine),
            env: self.settings.env.clone(),
            run_ids: Arc::clone(&self.run_ids),
            reports: Some(self.reports.clone()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        self.pipelines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
