// src/action/command.rs

//! Shell-command action.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Action, ActionContext, ActionEnv, ActionFuture};

/// Runs a shell command and succeeds iff it exits with status 0.
///
/// Container builds, `dbt run`, ingestion scripts and the like are all plain
/// commands from the core's point of view. An optional timeout is enforced
/// here, inside the action; the engine itself has none.
#[derive(Debug, Clone)]
pub struct CommandAction {
    cmd: String,
    env: ActionEnv,
    timeout: Option<Duration>,
}

impl CommandAction {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            env: ActionEnv::default(),
            timeout: None,
        }
    }

    pub fn with_env(mut self, env: ActionEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    async fn execute(&self, ctx: ActionContext) -> Result<()> {
        let env = ctx.env.merged(&self.env);

        info!(
            pipeline = %ctx.pipeline,
            run_id = ctx.run_id,
            unit = %ctx.unit,
            cmd = %self.cmd,
            "starting command"
        );

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&self.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&self.cmd);
            c
        };

        cmd.envs(&env.vars)
            .env("PIPEDAG_PIPELINE", &ctx.pipeline)
            .env("PIPEDAG_RUN_ID", ctx.run_id.to_string())
            .env("PIPEDAG_UNIT", &ctx.unit)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &env.workdir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning process for unit '{}'", ctx.unit))?;

        if let Some(stdout) = child.stdout.take() {
            let unit = ctx.unit.clone();
            let run_id = ctx.run_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(unit = %unit, run_id, "stdout: {}", line);
                }
            });
        }

        // Always drain stderr so the pipe never fills up.
        if let Some(stderr) = child.stderr.take() {
            let unit = ctx.unit.clone();
            let run_id = ctx.run_id;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(unit = %unit, run_id, "stderr: {}", line);
                }
            });
        }

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    warn!(
                        unit = %ctx.unit,
                        run_id = ctx.run_id,
                        timeout = ?limit,
                        "command exceeded its timeout; killing process"
                    );
                    if let Err(e) = child.kill().await {
                        warn!(unit = %ctx.unit, error = %e, "failed to kill timed-out process");
                    }
                    bail!("command timed out after {:?}", limit);
                }
            },
            None => child.wait().await,
        }
        .with_context(|| format!("waiting for process of unit '{}'", ctx.unit))?;

        let code = status.code().unwrap_or(-1);
        info!(
            unit = %ctx.unit,
            run_id = ctx.run_id,
            exit_code = code,
            success = status.success(),
            "command exited"
        );

        if !status.success() {
            bail!("command exited with status {code}");
        }

        Ok(())
    }
}

impl Action for CommandAction {
    fn run(&self, ctx: ActionContext) -> ActionFuture<'_> {
        Box::pin(self.execute(ctx))
    }

    fn describe(&self) -> String {
        self.cmd.clone()
    }
}
