// src/dag/graph.rs

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::action::Action;
use crate::dag::topo::TopologicalOrder;
use crate::dag::unit::{UnitId, WorkUnit};
use crate::errors::{PipedagError, Result};

/// Work units plus their precedence edges, keyed by id.
///
/// Units keep their insertion order, which is used to break ties between
/// simultaneously eligible units. Internally every unit is addressed by its
/// insertion index; `deps[i]` and `dependents[i]` hold the adjacency of unit
/// `i` in both directions.
///
/// Every dependency id resolves to a unit in the same graph. Acyclicity is
/// not guaranteed by construction when units were added through
/// [`GraphBuilder`] (forward references are allowed there); call
/// [`DependencyGraph::validate`] before executing.
#[derive(Clone, Default)]
pub struct DependencyGraph {
    units: Vec<WorkUnit>,
    index: HashMap<UnitId, usize>,
    deps: Vec<Vec<usize>>,
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a unit whose dependencies are all already present.
    ///
    /// Fails with `DuplicateUnit` if `id` is taken, or `UnknownDependency` if
    /// any dependency has not been added yet. On error the graph is left
    /// unchanged.
    pub fn add_unit<I, S>(
        &mut self,
        id: impl Into<UnitId>,
        action: Arc<dyn Action>,
        dependencies: I,
    ) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        let unit = WorkUnit::new(id, action, dependencies);

        if self.index.contains_key(unit.id()) {
            return Err(PipedagError::DuplicateUnit(unit.id().to_string()));
        }

        if let Some(missing) = unit
            .dependencies()
            .iter()
            .find(|dep| !self.index.contains_key(dep.as_str()))
        {
            return Err(PipedagError::UnknownDependency {
                unit: unit.id().to_string(),
                dependency: missing.clone(),
            });
        }

        let idx = self.push_unit(unit);
        self.connect(idx);
        Ok(())
    }

    /// Check that the graph is a DAG.
    ///
    /// On failure the error names one cycle, in execution direction, with the
    /// first unit repeated at the end (`a -> b -> a`).
    pub fn validate(&self) -> Result<()> {
        // Edge direction: dependency -> dependent.
        let mut graph: DiGraphMap<usize, ()> = DiGraphMap::new();

        for idx in 0..self.units.len() {
            graph.add_node(idx);
        }

        for (idx, deps) in self.deps.iter().enumerate() {
            for &dep in deps {
                graph.add_edge(dep, idx, ());
            }
        }

        match toposort(&graph, None) {
            Ok(_order) => Ok(()),
            Err(cycle) => {
                let path = self.cycle_through(cycle.node_id());
                debug!(?path, "dependency graph contains a cycle");
                Err(PipedagError::CycleDetected(path))
            }
        }
    }

    /// Lazy sequence of unit ids, each after all of its dependencies.
    ///
    /// Ties are broken by insertion order. Every call starts a fresh pass. On
    /// a cyclic graph the sequence ends early, without the units on or behind
    /// the cycle.
    pub fn topological_order(&self) -> TopologicalOrder<'_> {
        TopologicalOrder::new(self)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn unit(&self, id: &str) -> Option<&WorkUnit> {
        self.index.get(id).map(|&idx| &self.units[idx])
    }

    /// Units in insertion order.
    pub fn units(&self) -> impl Iterator<Item = &WorkUnit> {
        self.units.iter()
    }

    /// Unit ids in insertion order.
    pub fn unit_ids(&self) -> impl Iterator<Item = &str> {
        self.units.iter().map(|u| u.id())
    }

    /// Immediate dependencies of a unit.
    pub fn dependencies_of(&self, id: &str) -> &[UnitId] {
        self.unit(id).map(|u| u.dependencies()).unwrap_or(&[])
    }

    /// Immediate dependents of a unit, in insertion order.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        match self.index.get(id) {
            Some(&idx) => self.dependents[idx]
                .iter()
                .map(|&d| self.units[d].id())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Units with no dependencies, in insertion order.
    pub fn roots(&self) -> impl Iterator<Item = &str> {
        self.units
            .iter()
            .filter(|u| u.dependencies().is_empty())
            .map(|u| u.id())
    }

    pub(crate) fn unit_at(&self, idx: usize) -> &WorkUnit {
        &self.units[idx]
    }

    pub(crate) fn deps_idx(&self, idx: usize) -> &[usize] {
        &self.deps[idx]
    }

    pub(crate) fn dependents_idx(&self, idx: usize) -> &[usize] {
        &self.dependents[idx]
    }

    fn push_unit(&mut self, unit: WorkUnit) -> usize {
        let idx = self.units.len();
        self.index.insert(unit.id().to_string(), idx);
        self.units.push(unit);
        self.deps.push(Vec::new());
        self.dependents.push(Vec::new());
        idx
    }

    /// Populate adjacency for unit `idx`. All its dependencies must resolve.
    fn connect(&mut self, idx: usize) {
        let dep_indices: Vec<usize> = self.units[idx]
            .dependencies()
            .iter()
            .filter_map(|dep| self.index.get(dep.as_str()).copied())
            .collect();

        for &dep in &dep_indices {
            self.dependents[dep].push(idx);
        }
        self.deps[idx] = dep_indices;
    }

    /// Find a cycle passing through `start` by searching the dependents edges
    /// for a path leading back to it.
    fn cycle_through(&self, start: usize) -> Vec<UnitId> {
        let mut parent: HashMap<usize, usize> = HashMap::new();
        let mut seen: HashSet<usize> = HashSet::new();
        let mut queue: VecDeque<usize> = VecDeque::new();
        queue.push_back(start);
        seen.insert(start);

        while let Some(node) = queue.pop_front() {
            for &next in &self.dependents[node] {
                if next == start {
                    let mut path = vec![node];
                    let mut cur = node;
                    while cur != start {
                        match parent.get(&cur) {
                            Some(&p) => {
                                cur = p;
                                path.push(cur);
                            }
                            None => break,
                        }
                    }
                    path.reverse();
                    path.push(start);
                    return path
                        .into_iter()
                        .map(|i| self.units[i].id().to_string())
                        .collect();
                }
                if seen.insert(next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        vec![self.units[start].id().to_string()]
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("units", &self.units)
            .finish()
    }
}

/// Builder that defers dependency resolution to [`GraphBuilder::build`].
///
/// Unlike [`DependencyGraph::add_unit`], units may reference dependencies
/// declared later. This is the form used when loading definitions from
/// config files.
#[derive(Default)]
pub struct GraphBuilder {
    units: Vec<WorkUnit>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unit<I, S>(mut self, id: impl Into<UnitId>, action: Arc<dyn Action>, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        self.push(id, action, dependencies);
        self
    }

    pub fn push<I, S>(&mut self, id: impl Into<UnitId>, action: Arc<dyn Action>, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        self.units.push(WorkUnit::new(id, action, dependencies));
    }

    /// Resolve all references and produce the graph.
    ///
    /// Fails with `DuplicateUnit` or `UnresolvedDependency`. Cycles are
    /// reported by [`DependencyGraph::validate`], not here.
    pub fn build(self) -> Result<DependencyGraph> {
        let mut graph = DependencyGraph::new();

        for unit in self.units {
            if graph.contains(unit.id()) {
                return Err(PipedagError::DuplicateUnit(unit.id().to_string()));
            }
            graph.push_unit(unit);
        }

        for unit in graph.units.iter() {
            if let Some(missing) = unit
                .dependencies()
                .iter()
                .find(|dep| !graph.index.contains_key(dep.as_str()))
            {
                return Err(PipedagError::UnresolvedDependency {
                    unit: unit.id().to_string(),
                    dependency: missing.clone(),
                });
            }
        }

        for idx in 0..graph.units.len() {
            graph.connect(idx);
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::action_fn;

    fn noop() -> Arc<dyn Action> {
        action_fn("noop", |_ctx| async { Ok::<(), anyhow::Error>(()) })
    }

    #[test]
    fn strict_add_rejects_forward_references() {
        let mut graph = DependencyGraph::new();
        let err = graph
            .add_unit("run_transform", noop(), ["build_container"])
            .unwrap_err();
        assert!(matches!(
            err,
            PipedagError::UnknownDependency { ref unit, ref dependency }
                if unit == "run_transform" && dependency == "build_container"
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let graph = GraphBuilder::new()
            .unit("a", noop(), ["a"])
            .build()
            .unwrap();
        match graph.validate() {
            Err(PipedagError::CycleDetected(path)) => {
                assert_eq!(path, vec!["a".to_string(), "a".to_string()]);
            }
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn adjacency_is_tracked_both_ways() {
        let mut graph = DependencyGraph::new();
        graph.add_unit("a", noop(), Vec::<String>::new()).unwrap();
        graph.add_unit("b", noop(), ["a"]).unwrap();
        graph.add_unit("c", noop(), ["a", "b", "a"]).unwrap();

        assert_eq!(graph.dependencies_of("c"), ["a".to_string(), "b".to_string()]);
        assert_eq!(graph.dependents_of("a"), vec!["b", "c"]);
        assert_eq!(graph.roots().collect::<Vec<_>>(), vec!["a"]);
        assert!(graph.dependents_of("missing").is_empty());
    }
}
