// src/dag/unit.rs

//! Work units and their per-run status.

use std::fmt;
use std::sync::Arc;

use crate::action::Action;

/// Canonical unit identifier type.
pub type UnitId = String;

/// Status of a unit within one run.
///
/// Legal transitions:
/// - `Pending -> Running -> Succeeded`
/// - `Pending -> Running -> Failed`
/// - `Pending -> Skipped`
///
/// `Succeeded`, `Failed` and `Skipped` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl UnitStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Succeeded | UnitStatus::Failed | UnitStatus::Skipped
        )
    }

    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        matches!(
            (self, next),
            (UnitStatus::Pending, UnitStatus::Running)
                | (UnitStatus::Pending, UnitStatus::Skipped)
                | (UnitStatus::Running, UnitStatus::Succeeded)
                | (UnitStatus::Running, UnitStatus::Failed)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitStatus::Pending => "Pending",
            UnitStatus::Running => "Running",
            UnitStatus::Succeeded => "Succeeded",
            UnitStatus::Failed => "Failed",
            UnitStatus::Skipped => "Skipped",
        };
        f.pad(s)
    }
}

/// A named step with an opaque action and upstream dependencies.
#[derive(Clone)]
pub struct WorkUnit {
    id: UnitId,
    action: Arc<dyn Action>,
    dependencies: Vec<UnitId>,
}

impl WorkUnit {
    /// Create a unit. Duplicate dependency ids are collapsed, keeping the
    /// first occurrence.
    pub fn new<I, S>(id: impl Into<UnitId>, action: Arc<dyn Action>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        let mut deps: Vec<UnitId> = Vec::new();
        for dep in dependencies {
            let dep = dep.into();
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        Self {
            id: id.into(),
            action,
            dependencies: deps,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn action(&self) -> &Arc<dyn Action> {
        &self.action
    }

    pub fn dependencies(&self) -> &[UnitId] {
        &self.dependencies
    }
}

impl fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("action", &self.action.describe())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_forward_transitions_are_legal() {
        use UnitStatus::*;

        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Skipped));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Running.can_transition_to(Skipped));
        for terminal in [Succeeded, Failed, Skipped] {
            for next in [Pending, Running, Succeeded, Failed, Skipped] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }
}
