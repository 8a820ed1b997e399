// src/dag/topo.rs

use std::collections::BTreeSet;

use crate::dag::graph::DependencyGraph;

/// Kahn-style topological iterator over a [`DependencyGraph`].
///
/// Eligible units are kept in a `BTreeSet` of insertion indices so the
/// smallest index (earliest inserted) is always yielded first. The iterator
/// is `Clone`, so a partially consumed order can be forked.
#[derive(Debug, Clone)]
pub struct TopologicalOrder<'a> {
    graph: &'a DependencyGraph,
    /// Unfinished dependency count per unit.
    remaining: Vec<usize>,
    ready: BTreeSet<usize>,
}

impl<'a> TopologicalOrder<'a> {
    pub(crate) fn new(graph: &'a DependencyGraph) -> Self {
        let remaining: Vec<usize> = (0..graph.len())
            .map(|idx| graph.deps_idx(idx).len())
            .collect();
        let ready = remaining
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(idx, _)| idx)
            .collect();

        Self {
            graph,
            remaining,
            ready,
        }
    }
}

impl<'a> Iterator for TopologicalOrder<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.ready.pop_first()?;

        for &dependent in self.graph.dependents_idx(idx) {
            let count = &mut self.remaining[dependent];
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.ready.insert(dependent);
            }
        }

        Some(self.graph.unit_at(idx).id())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.ready.len(), Some(self.graph.len()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::action::{Action, action_fn};
    use crate::dag::GraphBuilder;

    fn noop() -> Arc<dyn Action> {
        action_fn("noop", |_ctx| async { Ok::<(), anyhow::Error>(()) })
    }

    #[test]
    fn ties_break_by_insertion_order() {
        let graph = GraphBuilder::new()
            .unit("load", noop(), ["upload", "labels"])
            .unit("upload", noop(), ["ingest"])
            .unit("labels", noop(), Vec::<String>::new())
            .unit("ingest", noop(), Vec::<String>::new())
            .build()
            .unwrap();

        let order: Vec<&str> = graph.topological_order().collect();
        assert_eq!(order, vec!["labels", "ingest", "upload", "load"]);
    }

    #[test]
    fn order_is_restartable_and_forkable() {
        let graph = GraphBuilder::new()
            .unit("a", noop(), Vec::<String>::new())
            .unit("b", noop(), ["a"])
            .unit("c", noop(), ["a"])
            .build()
            .unwrap();

        let mut first = graph.topological_order();
        assert_eq!(first.next(), Some("a"));
        let fork = first.clone();
        assert_eq!(first.collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(fork.collect::<Vec<_>>(), vec!["b", "c"]);

        assert_eq!(
            graph.topological_order().collect::<Vec<_>>(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn cyclic_part_is_never_yielded() {
        let graph = GraphBuilder::new()
            .unit("a", noop(), Vec::<String>::new())
            .unit("b", noop(), ["a", "c"])
            .unit("c", noop(), ["b"])
            .build()
            .unwrap();

        assert_eq!(graph.topological_order().collect::<Vec<_>>(), vec!["a"]);
    }
}
