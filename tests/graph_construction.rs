// tests/graph_construction.rs

use std::sync::Arc;

use pipedag::action::{Action, action_fn};
use pipedag::dag::{DependencyGraph, GraphBuilder};
use pipedag::errors::PipedagError;
use pipedag::template::{GraphTemplate, PipelineTemplate};

fn noop() -> Arc<dyn Action> {
    action_fn("noop", |_ctx| async { Ok::<(), anyhow::Error>(()) })
}

#[test]
fn duplicate_ids_are_rejected_by_both_construction_paths() {
    let mut graph = DependencyGraph::new();
    graph.add_unit("build_container", noop(), Vec::<String>::new()).unwrap();
    assert!(matches!(
        graph.add_unit("build_container", noop(), Vec::<String>::new()),
        Err(PipedagError::DuplicateUnit(ref id)) if id == "build_container"
    ));
    assert_eq!(graph.len(), 1);

    let built = GraphBuilder::new()
        .unit("x", noop(), Vec::<String>::new())
        .unit("x", noop(), Vec::<String>::new())
        .build();
    assert!(matches!(built, Err(PipedagError::DuplicateUnit(_))));
}

#[test]
fn builder_allows_forward_references_but_not_dangling_ones() {
    let graph = GraphBuilder::new()
        .unit("run_transform", noop(), ["build_container"])
        .unit("build_container", noop(), Vec::<String>::new())
        .build()
        .unwrap();
    assert_eq!(
        graph.topological_order().collect::<Vec<_>>(),
        vec!["build_container", "run_transform"]
    );

    let dangling = GraphBuilder::new()
        .unit("run_transform", noop(), ["run_docker_from_hub"])
        .build();
    match dangling {
        Err(PipedagError::UnresolvedDependency { unit, dependency }) => {
            assert_eq!(unit, "run_transform");
            assert_eq!(dependency, "run_docker_from_hub");
        }
        other => panic!("expected UnresolvedDependency, got {other:?}"),
    }
}

#[test]
fn topological_order_breaks_ties_by_insertion() {
    let graph = GraphBuilder::new()
        .unit("ingest_a", noop(), Vec::<String>::new())
        .unit("ingest_b", noop(), Vec::<String>::new())
        .unit("labels", noop(), ["ingest_b"])
        .unit("upload", noop(), ["ingest_a", "labels"])
        .build()
        .unwrap();

    let order: Vec<_> = graph.topological_order().collect();
    assert_eq!(order, vec!["ingest_a", "ingest_b", "labels", "upload"]);

    // Every call starts a fresh pass.
    assert_eq!(graph.topological_order().count(), 4);
}

#[test]
fn cycle_error_names_the_loop() {
    let graph = GraphBuilder::new()
        .unit("a", noop(), ["b"])
        .unit("b", noop(), ["a"])
        .build()
        .unwrap();

    let err = graph.validate().unwrap_err();
    assert!(err.is_graph_error());
    assert!(err.to_string().contains("->"), "{err}");
}

#[tokio::test]
async fn templates_instantiate_independent_graphs() {
    let template = PipelineTemplate::new("build-and-run")
        .with_unit("build_container", noop(), Vec::<String>::new())
        .with_unit("run_transform", noop(), ["build_container"]);

    let first = template.instantiate().await.unwrap();
    let second = template.instantiate().await.unwrap();

    assert_eq!(template.name(), "build-and-run");
    assert_eq!(first.len(), 2);
    assert_eq!(
        first.unit_ids().collect::<Vec<_>>(),
        second.unit_ids().collect::<Vec<_>>()
    );
    assert!(first.validate().is_ok());
}
