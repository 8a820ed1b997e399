// src/engine/run.rs

//! Pipeline run records.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::dag::{DependencyGraph, UnitId, UnitStatus};
use crate::errors::{PipedagError, Result};

/// Terminal outcome of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit reached `Succeeded`.
    Succeeded,
    /// At least one unit `Failed` or was `Skipped`.
    Failed,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Succeeded => f.pad("Succeeded"),
            RunOutcome::Failed => f.pad("Failed"),
        }
    }
}

/// Terminal state of one unit within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitReport {
    pub id: UnitId,
    pub status: UnitStatus,
    /// Error reported by the action, for `Failed` units.
    pub error: Option<String>,
}

/// The first unit to fail in a run, in completion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirstFailure {
    pub unit: UnitId,
    pub error: String,
}

/// One concrete execution of a dependency graph.
///
/// Returned by the engine once every unit is terminal. Nothing is persisted;
/// callers log, print or drop it.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub pipeline: String,
    pub run_id: u64,
    pub graph: Arc<DependencyGraph>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Unit reports in graph insertion order.
    pub units: Vec<UnitReport>,
    pub first_failure: Option<FirstFailure>,
    /// Whether the run was cancelled before every unit could be started.
    pub cancelled: bool,
}

impl PipelineRun {
    pub fn succeeded(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    pub fn status_of(&self, unit: &str) -> Option<UnitStatus> {
        self.units.iter().find(|u| u.id == unit).map(|u| u.status)
    }

    pub fn error_of(&self, unit: &str) -> Option<&str> {
        self.units
            .iter()
            .find(|u| u.id == unit)
            .and_then(|u| u.error.as_deref())
    }

    /// `(id, status)` pairs in insertion order.
    pub fn statuses(&self) -> Vec<(&str, UnitStatus)> {
        self.units
            .iter()
            .map(|u| (u.id.as_str(), u.status))
            .collect()
    }

    pub fn duration(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }

    /// Turn a failed run into an `ActionFailure` naming its first failure.
    ///
    /// A run that failed only through cancellation has no failing unit; it is
    /// reported against the pipeline itself.
    pub fn into_result(self) -> Result<PipelineRun> {
        if self.succeeded() {
            return Ok(self);
        }

        match &self.first_failure {
            Some(failure) => Err(PipedagError::ActionFailure {
                unit: failure.unit.clone(),
                message: failure.error.clone(),
            }),
            None => Err(PipedagError::ActionFailure {
                unit: self.pipeline.clone(),
                message: if self.cancelled {
                    "run cancelled before all units were started".to_string()
                } else {
                    "run did not complete".to_string()
                },
            }),
        }
    }
}

impl fmt::Display for PipelineRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline '{}' run #{}: {}",
            self.pipeline, self.run_id, self.outcome
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        if let Some(failure) = &self.first_failure {
            write!(f, " (first failure: {}: {})", failure.unit, failure.error)?;
        }
        writeln!(f)?;

        let width = self.units.iter().map(|u| u.id.len()).max().unwrap_or(0);
        for unit in &self.units {
            write!(f, "  {:<width$}  {:<9}", unit.id, unit.status, width = width)?;
            if let Some(err) = &unit.error {
                write!(f, "  {err}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
