// src/action/mod.rs

//! Executable behaviour bound to work units.
//!
//! The engine only cares that an [`Action`] eventually resolves to `Ok(())`
//! or an error. What the action does (start a container, run a
//! transformation job, upload a file) is opaque to the core.
//!
//! - [`command`] runs a shell command with `tokio::process`.
//! - [`closure`] wraps an async closure, which is how embedders and tests
//!   plug in their own behaviour.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::dag::UnitId;

pub mod closure;
pub mod command;

pub use closure::{FnAction, action_fn};
pub use command::CommandAction;

/// Boxed future returned by [`Action::run`].
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// A side-effecting operation with no result beyond success or failure.
pub trait Action: Send + Sync {
    /// Run the action once for the given invocation context.
    fn run(&self, ctx: ActionContext) -> ActionFuture<'_>;

    /// Short human-readable description for logs and dry-run output.
    fn describe(&self) -> String {
        String::from("<action>")
    }
}

/// Explicit environment handed to actions at invocation time.
///
/// There is no process-global client state: anything an action needs from
/// the deployment (variables, working directory) arrives through this struct
/// and lives only for the duration of the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionEnv {
    pub vars: BTreeMap<String, String>,
    pub workdir: Option<PathBuf>,
}

impl ActionEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn with_workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(dir.into());
        self
    }

    /// Layer `overrides` on top of `self`.
    ///
    /// Variables from `overrides` win on conflict. A relative override workdir
    /// is resolved against the base workdir.
    pub fn merged(&self, overrides: &ActionEnv) -> ActionEnv {
        let mut vars = self.vars.clone();
        vars.extend(
            overrides
                .vars
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );

        let workdir = match (&self.workdir, &overrides.workdir) {
            (Some(base), Some(dir)) if dir.is_relative() => Some(base.join(dir)),
            (_, Some(dir)) => Some(dir.clone()),
            (base, None) => base.clone(),
        };

        ActionEnv { vars, workdir }
    }
}

/// Per-invocation context passed to [`Action::run`].
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub pipeline: String,
    pub run_id: u64,
    pub unit: UnitId,
    pub env: ActionEnv,
}
