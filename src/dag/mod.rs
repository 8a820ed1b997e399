// src/dag/mod.rs

//! Dependency graph representation.
//!
//! - [`unit`] defines work units and their status state machine.
//! - [`graph`] holds the units and precedence edges, and validates them.
//! - [`topo`] yields a deterministic topological order.
//! - [`status`] tracks per-run unit statuses.

pub mod graph;
pub mod status;
pub mod topo;
pub mod unit;

pub use graph::{DependencyGraph, GraphBuilder};
pub use status::StatusTable;
pub use topo::TopologicalOrder;
pub use unit::{UnitId, UnitStatus, WorkUnit};
