// src/trigger/mod.rs

//! Deciding when a pipeline runs.
//!
//! A [`TriggerLayer`] holds named registrations. Each registration pairs a
//! [`GraphTemplate`] with a [`TriggerMode`] and gets its own supervisor task,
//! which guarantees at most one active run per pipeline and queues overlapping
//! fires according to the configured [`OverlapBehaviour`].
//!
//! [`OverlapBehaviour`]: crate::types::OverlapBehaviour

use std::fmt;
use std::sync::Arc;

use crate::source::{SourceDescriptor, SourceResolver};
use crate::template::{GraphTemplate, SourceTemplate};

pub mod core;
pub mod layer;
pub mod queue;
pub mod schedule;
pub mod signal;
pub mod supervisor;

pub use layer::{TriggerLayer, TriggerSettings};
pub use queue::FireQueue;
pub use schedule::CronSchedule;
pub use supervisor::{ReportResult, RunReport, SupervisorHandle};

/// When a registered pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerMode {
    /// Once, at registration.
    Immediate,
    /// On every fire time of a cron expression.
    Cron(String),
    /// Whenever the referenced source changes.
    ExternalSignal(SourceDescriptor),
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::Immediate => f.write_str("immediate"),
            TriggerMode::Cron(expr) => write!(f, "cron({expr})"),
            TriggerMode::ExternalSignal(source) => {
                write!(f, "signal({} @ {})", source.entry_point, source.repository_url)
            }
        }
    }
}

/// A pipeline definition together with its trigger.
#[derive(Clone)]
pub struct TriggerConfig {
    pub mode: TriggerMode,
    pub target: Arc<dyn GraphTemplate>,
}

impl fmt::Debug for TriggerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerConfig")
            .field("mode", &self.mode)
            .field("target", &self.target.name())
            .finish()
    }
}

impl TriggerConfig {
    pub fn immediate(target: Arc<dyn GraphTemplate>) -> Self {
        Self {
            mode: TriggerMode::Immediate,
            target,
        }
    }

    pub fn cron(expression: impl Into<String>, target: Arc<dyn GraphTemplate>) -> Self {
        Self {
            mode: TriggerMode::Cron(expression.into()),
            target,
        }
    }

    /// The definition is fetched from `source` on every fire.
    pub fn external_signal(
        name: impl Into<String>,
        source: SourceDescriptor,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        let target = SourceTemplate::new(name, source.clone(), resolver);
        Self {
            mode: TriggerMode::ExternalSignal(source),
            target: Arc::new(target),
        }
    }

    pub fn name(&self) -> &str {
        self.target.name()
    }
}

/// What caused a run to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireReason {
    Registration,
    Manual,
    Schedule,
    Signal,
}

impl fmt::Display for FireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FireReason::Registration => "registration",
            FireReason::Manual => "manual",
            FireReason::Schedule => "schedule",
            FireReason::Signal => "signal",
        };
        f.pad(s)
    }
}
