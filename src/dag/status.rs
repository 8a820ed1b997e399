// src/dag/status.rs

//! Per-run unit status bookkeeping.

use tracing::{debug, warn};

use crate::dag::graph::DependencyGraph;
use crate::dag::unit::UnitStatus;

/// Status of every unit for one run, indexed like the graph.
///
/// The graph itself is shared and immutable; each run owns its own table.
/// All transitions go through [`StatusTable::transition`], which refuses
/// anything but the forward moves listed on [`UnitStatus`].
pub struct StatusTable<'a> {
    graph: &'a DependencyGraph,
    statuses: Vec<UnitStatus>,
}

impl<'a> StatusTable<'a> {
    pub fn new(graph: &'a DependencyGraph) -> Self {
        Self {
            graph,
            statuses: vec![UnitStatus::Pending; graph.len()],
        }
    }

    pub fn status(&self, idx: usize) -> UnitStatus {
        self.statuses[idx]
    }

    pub fn status_of(&self, id: &str) -> Option<UnitStatus> {
        self.graph
            .units()
            .position(|u| u.id() == id)
            .map(|idx| self.statuses[idx])
    }

    /// Apply a transition if it is legal. Returns whether it was applied.
    pub fn transition(&mut self, idx: usize, next: UnitStatus) -> bool {
        let current = self.statuses[idx];
        if !current.can_transition_to(next) {
            warn!(
                unit = %self.graph.unit_at(idx).id(),
                from = %current,
                to = %next,
                "refusing illegal unit status transition"
            );
            return false;
        }

        debug!(
            unit = %self.graph.unit_at(idx).id(),
            from = %current,
            to = %next,
            "unit status transition"
        );
        self.statuses[idx] = next;
        true
    }

    /// Whether every dependency of `idx` has succeeded.
    pub fn deps_satisfied(&self, idx: usize) -> bool {
        self.graph
            .deps_idx(idx)
            .iter()
            .all(|&dep| self.statuses[dep] == UnitStatus::Succeeded)
    }

    /// Collect up to `limit` eligible units in insertion order and mark them
    /// `Running`.
    ///
    /// The caller must invoke each returned unit's action exactly once.
    pub fn collect_ready(&mut self, limit: usize) -> Vec<usize> {
        // Decide first, then mutate.
        let candidates: Vec<usize> = (0..self.statuses.len())
            .filter(|&idx| self.statuses[idx] == UnitStatus::Pending && self.deps_satisfied(idx))
            .take(limit)
            .collect();

        candidates
            .into_iter()
            .filter(|&idx| self.transition(idx, UnitStatus::Running))
            .collect()
    }

    /// Mark every pending unit downstream of `idx` as `Skipped`.
    ///
    /// Returns the newly skipped units. Units that are not `Pending` are left
    /// untouched; a dependent can only be `Running` if all of its
    /// dependencies succeeded, so none of them are reachable from a failure.
    pub fn skip_dependents_of(&mut self, idx: usize) -> Vec<usize> {
        let mut stack: Vec<usize> = self.graph.dependents_idx(idx).to_vec();
        let mut skipped = Vec::new();

        while let Some(next) = stack.pop() {
            if self.statuses[next] == UnitStatus::Pending && self.transition(next, UnitStatus::Skipped) {
                skipped.push(next);
                stack.extend_from_slice(self.graph.dependents_idx(next));
            }
        }

        skipped.sort_unstable();
        skipped
    }

    /// Skip every unit still `Pending` (used on cancellation).
    pub fn skip_all_pending(&mut self) -> Vec<usize> {
        let pending: Vec<usize> = (0..self.statuses.len())
            .filter(|&idx| self.statuses[idx] == UnitStatus::Pending)
            .collect();

        pending
            .into_iter()
            .filter(|&idx| self.transition(idx, UnitStatus::Skipped))
            .collect()
    }

    pub fn running_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s == UnitStatus::Running)
            .count()
    }

    pub fn all_terminal(&self) -> bool {
        self.statuses.iter().all(|s| s.is_terminal())
    }

    pub fn all_succeeded(&self) -> bool {
        self.statuses.iter().all(|s| *s == UnitStatus::Succeeded)
    }

    pub fn into_statuses(self) -> Vec<UnitStatus> {
        self.statuses
    }
}
