// src/engine/mod.rs

//! Execution engine.
//!
//! [`ExecutionEngine`] takes one [`DependencyGraph`](crate::dag::DependencyGraph),
//! validates it, runs eligible units concurrently on a `JoinSet`, propagates
//! failures as `Skipped` to downstream units, and returns a [`PipelineRun`].
//! It knows nothing about schedules or triggers; that is the job of
//! [`crate::trigger`].

use tokio::sync::watch;

use crate::action::ActionEnv;

pub mod executor;
pub mod run;

pub use executor::ExecutionEngine;
pub use run::{FirstFailure, PipelineRun, RunOutcome, UnitReport};

/// Default bound on concurrently running actions within a single run.
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Engine tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    /// Upper bound on actions in flight within one run. Values below 1 are
    /// treated as 1.
    pub max_parallel: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

/// Everything a single run needs besides the graph.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub pipeline: String,
    pub run_id: u64,
    /// Environment handed to every action of the run.
    pub env: ActionEnv,
    /// Flips to `true` when the run should stop starting new units.
    pub cancel: Option<watch::Receiver<bool>>,
}

impl RunContext {
    pub fn new(pipeline: impl Into<String>, run_id: u64) -> Self {
        Self {
            pipeline: pipeline.into(),
            run_id,
            env: ActionEnv::default(),
            cancel: None,
        }
    }

    pub fn with_env(mut self, env: ActionEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
