// src/trigger/core.rs

//! Pure per-pipeline supervisor state machine.
//!
//! One [`SupervisorCore`] decides, for a single registered pipeline, when a
//! fire turns into a run. It enforces "at most one active run" and applies
//! the overlap queue. It owns no channels and does no IO; the async shell in
//! [`crate::trigger::supervisor`] feeds it events and carries out the
//! commands it returns.

use tracing::{debug, info};

use crate::trigger::queue::FireQueue;
use crate::types::OverlapBehaviour;

/// Input to the supervisor core.
#[derive(Debug)]
pub enum SupervisorEvent<T> {
    /// Someone asked for a run.
    Fire(T),
    /// The active run reached its outcome (or failed to start).
    RunFinished,
    /// The pipeline is being deregistered.
    Cancel,
}

/// Why a fire will never turn into a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The pipeline was deregistered before the fire could run.
    Cancelled,
    /// A newer fire displaced it from the overlap queue.
    Superseded,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Cancelled => f.write_str("pipeline was deregistered"),
            RejectReason::Superseded => f.write_str("superseded by a newer trigger"),
        }
    }
}

/// What the shell should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum SupervisorCommand<T> {
    /// Instantiate the template and run it for this fire.
    StartRun(T),
    /// Tell the owner of this fire that it was dropped.
    Reject(T, RejectReason),
    /// Stop the supervisor loop.
    Exit,
}

#[derive(Debug)]
pub struct SupervisorCore<T> {
    pipeline: String,
    queue: FireQueue<T>,
    active: bool,
    cancelled: bool,
}

impl<T> SupervisorCore<T> {
    pub fn new(pipeline: impl Into<String>, overlap: OverlapBehaviour, queue_length: usize) -> Self {
        Self {
            pipeline: pipeline.into(),
            queue: FireQueue::new(overlap, queue_length),
            active: false,
            cancelled: false,
        }
    }

    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn step(&mut self, event: SupervisorEvent<T>) -> Vec<SupervisorCommand<T>> {
        match event {
            SupervisorEvent::Fire(fire) => self.on_fire(fire),
            SupervisorEvent::RunFinished => self.on_run_finished(),
            SupervisorEvent::Cancel => self.on_cancel(),
        }
    }

    fn on_fire(&mut self, fire: T) -> Vec<SupervisorCommand<T>> {
        if self.cancelled {
            return vec![SupervisorCommand::Reject(fire, RejectReason::Cancelled)];
        }

        if !self.active {
            self.active = true;
            return vec![SupervisorCommand::StartRun(fire)];
        }

        let dropped = self.queue.push(fire);
        debug!(
            pipeline = %self.pipeline,
            pending = self.queue.len(),
            "run already active; fire queued"
        );
        dropped
            .into_iter()
            .map(|f| SupervisorCommand::Reject(f, RejectReason::Superseded))
            .collect()
    }

    fn on_run_finished(&mut self) -> Vec<SupervisorCommand<T>> {
        self.active = false;

        if self.cancelled {
            return vec![SupervisorCommand::Exit];
        }

        match self.queue.pop() {
            Some(next) => {
                self.active = true;
                debug!(pipeline = %self.pipeline, "starting queued fire");
                vec![SupervisorCommand::StartRun(next)]
            }
            None => Vec::new(),
        }
    }

    fn on_cancel(&mut self) -> Vec<SupervisorCommand<T>> {
        if self.cancelled {
            return Vec::new();
        }
        self.cancelled = true;

        let mut commands: Vec<_> = self
            .queue
            .drain()
            .into_iter()
            .map(|f| SupervisorCommand::Reject(f, RejectReason::Cancelled))
            .collect();

        info!(
            pipeline = %self.pipeline,
            active = self.active,
            dropped = commands.len(),
            "supervisor cancelled"
        );

        // An active run must report back before the loop may stop.
        if !self.active {
            commands.push(SupervisorCommand::Exit);
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::SupervisorCommand::*;
    use super::*;

    fn core(overlap: OverlapBehaviour, len: usize) -> SupervisorCore<u32> {
        SupervisorCore::new("p", overlap, len)
    }

    #[test]
    fn fire_while_idle_starts_immediately() {
        let mut c = core(OverlapBehaviour::Queue, 1);
        assert_eq!(c.step(SupervisorEvent::Fire(1)), vec![StartRun(1)]);
        assert!(c.is_active());
    }

    #[test]
    fn fire_while_active_is_queued_until_the_run_finishes() {
        let mut c = core(OverlapBehaviour::Queue, 1);
        c.step(SupervisorEvent::Fire(1));

        assert!(c.step(SupervisorEvent::Fire(2)).is_empty());
        assert_eq!(c.pending(), 1);

        assert_eq!(c.step(SupervisorEvent::RunFinished), vec![StartRun(2)]);
        assert!(c.is_active());
        assert!(c.step(SupervisorEvent::RunFinished).is_empty());
        assert!(!c.is_active());
    }

    #[test]
    fn overflow_rejects_the_oldest_pending_fire() {
        let mut c = core(OverlapBehaviour::Queue, 1);
        c.step(SupervisorEvent::Fire(1));
        c.step(SupervisorEvent::Fire(2));
        assert_eq!(
            c.step(SupervisorEvent::Fire(3)),
            vec![Reject(2, RejectReason::Superseded)]
        );
        assert_eq!(c.step(SupervisorEvent::RunFinished), vec![StartRun(3)]);
    }

    #[test]
    fn coalesce_keeps_the_latest_pending_fire() {
        let mut c = core(OverlapBehaviour::Coalesce, 4);
        c.step(SupervisorEvent::Fire(1));
        c.step(SupervisorEvent::Fire(2));
        c.step(SupervisorEvent::Fire(3));
        assert_eq!(c.pending(), 1);
        assert_eq!(c.step(SupervisorEvent::RunFinished), vec![StartRun(3)]);
    }

    #[test]
    fn cancel_while_idle_exits() {
        let mut c = core(OverlapBehaviour::Queue, 1);
        assert_eq!(c.step(SupervisorEvent::Cancel), vec![Exit]);
        assert_eq!(
            c.step(SupervisorEvent::Fire(9)),
            vec![Reject(9, RejectReason::Cancelled)]
        );
    }

    #[test]
    fn cancel_while_active_waits_for_the_run() {
        let mut c = core(OverlapBehaviour::Queue, 2);
        c.step(SupervisorEvent::Fire(1));
        c.step(SupervisorEvent::Fire(2));

        assert_eq!(
            c.step(SupervisorEvent::Cancel),
            vec![Reject(2, RejectReason::Cancelled)]
        );
        assert!(c.is_cancelled());
        assert!(c.step(SupervisorEvent::Cancel).is_empty());
        assert_eq!(c.step(SupervisorEvent::RunFinished), vec![Exit]);
    }
}
