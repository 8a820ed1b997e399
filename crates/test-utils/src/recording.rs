//! Actions that record how the engine called them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::Notify;

use pipedag::action::{Action, action_fn};

#[derive(Debug, Default)]
struct State {
    /// `(unit, run_id)` in start order.
    calls: Vec<(String, u64)>,
    running: usize,
    max_running: usize,
}

/// Shared log of action invocations plus a concurrency high-water mark.
///
/// Every action built from one recorder writes to the same log, so a test
/// can assert on invocation order across units.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<State>>,
}

/// Decrements the running count even if the action panics.
struct RunningGuard(Arc<Mutex<State>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.running -= 1;
        }
    }
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit ids in the order their actions started.
    pub fn invoked(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .map(|(unit, _)| unit.clone())
            .collect()
    }

    /// `(unit, run_id)` pairs in start order.
    pub fn calls(&self) -> Vec<(String, u64)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count(&self, unit: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(u, _)| u == unit)
            .count()
    }

    pub fn was_invoked(&self, unit: &str) -> bool {
        self.count(unit) > 0
    }

    /// Largest number of recorded actions that were running at once.
    pub fn max_concurrency(&self) -> usize {
        self.state.lock().unwrap().max_running
    }

    /// Poll until `unit` has started at least `times` times.
    pub async fn wait_for(&self, unit: &str, times: usize) {
        while self.count(unit) < times {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn enter(state: &Arc<Mutex<State>>, unit: &str, run_id: u64) -> RunningGuard {
        let mut s = state.lock().unwrap();
        s.calls.push((unit.to_string(), run_id));
        s.running += 1;
        s.max_running = s.max_running.max(s.running);
        RunningGuard(Arc::clone(state))
    }

    pub fn succeed(&self, name: &str) -> Arc<dyn Action> {
        self.sleep(name, Duration::ZERO)
    }

    /// Succeeds after `delay`.
    pub fn sleep(&self, name: &str, delay: Duration) -> Arc<dyn Action> {
        let state = Arc::clone(&self.state);
        action_fn(name, move |ctx| {
            let state = Arc::clone(&state);
            async move {
                let _guard = Recorder::enter(&state, &ctx.unit, ctx.run_id);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<(), anyhow::Error>(())
            }
        })
    }

    pub fn fail(&self, name: &str, message: &str) -> Arc<dyn Action> {
        let state = Arc::clone(&self.state);
        let message = message.to_string();
        action_fn(name, move |ctx| {
            let state = Arc::clone(&state);
            let message = message.clone();
            async move {
                let _guard = Recorder::enter(&state, &ctx.unit, ctx.run_id);
                Err::<(), _>(anyhow!(message))
            }
        })
    }

    pub fn panic(&self, name: &str) -> Arc<dyn Action> {
        let state = Arc::clone(&self.state);
        action_fn(name, move |ctx| {
            let state = Arc::clone(&state);
            async move {
                let _guard = Recorder::enter(&state, &ctx.unit, ctx.run_id);
                explode(&ctx.unit)
            }
        })
    }

    /// Blocks until `gate` is notified, then succeeds. Each invocation
    /// consumes one permit.
    pub fn gated(&self, name: &str, gate: Arc<Notify>) -> Arc<dyn Action> {
        let state = Arc::clone(&self.state);
        action_fn(name, move |ctx| {
            let state = Arc::clone(&state);
            let gate = Arc::clone(&gate);
            async move {
                let _guard = Recorder::enter(&state, &ctx.unit, ctx.run_id);
                gate.notified().await;
                Ok::<(), anyhow::Error>(())
            }
        })
    }
}

fn explode(unit: &str) -> anyhow::Result<()> {
    panic!("action for {unit} blew up");
}
