// tests/trigger_layer.rs

mod common;

use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, mpsc};

use pipedag::action::ActionEnv;
use pipedag::dag::UnitStatus;
use pipedag::engine::ExecutionEngine;
use pipedag::errors::PipedagError;
use pipedag::source::{GitSourceResolver, SourceDescriptor, SourceResolver};
use pipedag::template::PipelineTemplate;
use pipedag::trigger::{
    FireReason, ReportResult, RunReport, TriggerConfig, TriggerLayer, TriggerMode, TriggerSettings,
};
use pipedag::types::OverlapBehaviour;
use pipedag_test_utils::{Recorder, init_tracing, with_timeout};

use crate::common::write_source_repo;

type TestResult = Result<(), Box<dyn Error>>;

const MONTHLY: &str = "0 0 1 * *";

fn layer_with(settings: TriggerSettings) -> (TriggerLayer, mpsc::UnboundedReceiver<RunReport>) {
    let cache = std::env::temp_dir().join("pipedag-test-cache");
    let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new(cache));
    TriggerLayer::new(ExecutionEngine::default(), settings, resolver)
}

fn layer() -> (TriggerLayer, mpsc::UnboundedReceiver<RunReport>) {
    layer_with(TriggerSettings::default())
}

fn gated_pipeline(name: &str, rec: &Recorder, gate: &Arc<Notify>) -> Arc<PipelineTemplate> {
    Arc::new(
        PipelineTemplate::new(name)
            .with_unit("work", rec.gated("work", Arc::clone(gate)), Vec::<String>::new())
            .with_unit("publish", rec.succeed("publish"), ["work"]),
    )
}

async fn next_report(reports: &mut mpsc::UnboundedReceiver<RunReport>) -> RunReport {
    with_timeout(reports.recv()).await.expect("report channel closed")
}

#[tokio::test]
async fn immediate_runs_once_at_registration() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let rec = Recorder::new();

    let template = PipelineTemplate::new("build-and-run")
        .with_unit("build_container", rec.succeed("build_container"), Vec::<String>::new())
        .with_unit("run_transform", rec.succeed("run_transform"), ["build_container"]);

    let run = with_timeout(layer.register(TriggerConfig::immediate(Arc::new(template))))
        .await?
        .expect("immediate registration returns its run");

    assert!(run.succeeded());
    assert_eq!(run.pipeline, "build-and-run");
    assert_eq!(run.run_id, 1);
    assert_eq!(rec.invoked(), vec!["build_container", "run_transform"]);
    assert!(layer.is_registered("build-and-run"));
    Ok(())
}

#[tokio::test]
async fn duplicate_names_are_rejected() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let rec = Recorder::new();
    let template = Arc::new(PipelineTemplate::new("p").with_unit("u", rec.succeed("u"), Vec::<String>::new()));

    layer.register(TriggerConfig::cron(MONTHLY, template.clone())).await?;
    match layer.register(TriggerConfig::cron(MONTHLY, template)).await {
        Err(PipedagError::DuplicatePipeline(name)) => assert_eq!(name, "p"),
        other => panic!("expected DuplicatePipeline, got {other:?}"),
    }
    assert_eq!(layer.names(), vec!["p"]);
    assert!(rec.invoked().is_empty());
    layer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn bad_cron_expression_is_rejected_without_registering() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let template = Arc::new(PipelineTemplate::new("p").with_unit("u", Recorder::new().succeed("u"), Vec::<String>::new()));

    match layer.register(TriggerConfig::cron("every monday", template)).await {
        Err(PipedagError::InvalidSchedule { expression, .. }) => assert_eq!(expression, "every monday"),
        other => panic!("expected InvalidSchedule, got {other:?}"),
    }
    assert!(!layer.is_registered("p"));
    Ok(())
}

#[tokio::test]
async fn malformed_or_missing_sources_are_rejected() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new("/tmp/unused"));

    for source in [
        SourceDescriptor::new("/definitely/not/a/checkout", "pipelines.toml:p"),
        SourceDescriptor::new("https://example.com/org/repo.git", "pipeline.py:build_and_run_pipeline"),
    ] {
        let config = TriggerConfig::external_signal("from-source", source, Arc::clone(&resolver));
        match layer.register(config).await {
            Err(PipedagError::InvalidSource(_)) => {}
            other => panic!("expected InvalidSource, got {other:?}"),
        }
    }
    assert!(!layer.is_registered("from-source"));
    Ok(())
}

#[tokio::test]
async fn cyclic_immediate_pipeline_is_rolled_back() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let rec = Recorder::new();
    let template = PipelineTemplate::new("loop")
        .with_unit("a", rec.succeed("a"), ["b"])
        .with_unit("b", rec.succeed("b"), ["a"]);

    match with_timeout(layer.register(TriggerConfig::immediate(Arc::new(template)))).await {
        Err(PipedagError::CycleDetected(_)) => {}
        other => panic!("expected CycleDetected, got {other:?}"),
    }
    assert!(!layer.is_registered("loop"));
    assert!(rec.invoked().is_empty());

    // The rejected graph never became a run, so it used no run id.
    let fixed = PipelineTemplate::new("loop").with_unit("a", rec.succeed("a"), Vec::<String>::new());
    let run = with_timeout(layer.register(TriggerConfig::immediate(Arc::new(fixed))))
        .await?
        .expect("immediate registration returns its run");
    assert_eq!(run.run_id, 1);
    assert!(run.succeeded());
    Ok(())
}

#[tokio::test]
async fn overlapping_cron_fire_is_queued_not_run_concurrently() -> TestResult {
    init_tracing();
    let (layer, mut reports) = layer();
    let rec = Recorder::new();
    let gate = Arc::new(Notify::new());

    layer
        .register(TriggerConfig::cron(MONTHLY, gated_pipeline("monthly", &rec, &gate)))
        .await?;

    layer.fire("monthly")?;
    with_timeout(rec.wait_for("work", 1)).await;

    // Second fire while the first run is still active.
    layer.fire("monthly")?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(rec.count("work"), 1);

    gate.notify_one();
    let first = next_report(&mut reports).await;

    with_timeout(rec.wait_for("work", 2)).await;
    gate.notify_one();
    let second = next_report(&mut reports).await;

    assert_eq!(rec.max_concurrency(), 1);
    assert_eq!(first.reason, FireReason::Schedule);
    match (first.result, second.result) {
        (ReportResult::Completed(a), ReportResult::Completed(b)) => {
            assert!(a.succeeded() && b.succeeded());
            assert!(a.finished_at <= b.started_at);
            assert_ne!(a.run_id, b.run_id);
        }
        other => panic!("expected two completed runs, got {other:?}"),
    }

    layer.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn cron_registration_fires_on_its_own() -> TestResult {
    init_tracing();
    let (layer, mut reports) = layer();
    let rec = Recorder::new();
    let template = PipelineTemplate::new("every-second")
        .with_unit("tick", rec.succeed("tick"), Vec::<String>::new());

    let registered = layer
        .register(TriggerConfig::cron("* * * * * *", Arc::new(template)))
        .await?;
    assert!(registered.is_none());

    let report = next_report(&mut reports).await;
    assert_eq!(report.pipeline, "every-second");
    assert_eq!(report.reason, FireReason::Schedule);
    match report.result {
        ReportResult::Completed(run) => assert!(run.succeeded(), "{run}"),
        ReportResult::NotStarted(err) => panic!("expected a run, got: {err}"),
    }
    assert!(rec.was_invoked("tick"));

    layer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn queue_overflow_drops_the_oldest_waiting_fire() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer_with(TriggerSettings {
        overlap: OverlapBehaviour::Queue,
        queue_length: 1,
        ..TriggerSettings::default()
    });
    let layer = Arc::new(layer);
    let rec = Recorder::new();
    let gate = Arc::new(Notify::new());

    layer
        .register(TriggerConfig::cron(MONTHLY, gated_pipeline("busy", &rec, &gate)))
        .await?;

    layer.fire("busy")?;
    with_timeout(rec.wait_for("work", 1)).await;

    let waiting = {
        let layer = Arc::clone(&layer);
        tokio::spawn(async move { layer.invoke("busy").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    layer.fire("busy")?;

    match with_timeout(waiting).await? {
        Err(PipedagError::FireDropped { pipeline, .. }) => assert_eq!(pipeline, "busy"),
        other => panic!("expected FireDropped, got {other:?}"),
    }

    gate.notify_one();
    with_timeout(rec.wait_for("work", 2)).await;
    gate.notify_one();
    layer.shutdown().await;
    assert_eq!(rec.count("work"), 2);
    Ok(())
}

#[tokio::test]
async fn invoke_goes_through_the_supervisor() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let rec = Recorder::new();
    let template = PipelineTemplate::new("manual").with_unit("u", rec.succeed("u"), Vec::<String>::new());

    layer.register(TriggerConfig::cron(MONTHLY, Arc::new(template))).await?;

    let first = with_timeout(layer.invoke("manual")).await?;
    let second = with_timeout(layer.invoke("manual")).await?;
    assert!(first.succeeded() && second.succeeded());
    assert_eq!((first.run_id, second.run_id), (1, 2));

    assert!(matches!(
        layer.invoke("nope").await,
        Err(PipedagError::PipelineNotFound(_))
    ));
    layer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn deregister_cancels_the_active_run() -> TestResult {
    init_tracing();
    let (layer, _reports) = layer();
    let layer = Arc::new(layer);
    let rec = Recorder::new();
    let gate = Arc::new(Notify::new());

    layer
        .register(TriggerConfig::cron(MONTHLY, gated_pipeline("long", &rec, &gate)))
        .await?;

    let running = {
        let layer = Arc::clone(&layer);
        tokio::spawn(async move { layer.invoke("long").await })
    };
    with_timeout(rec.wait_for("work", 1)).await;

    let deregistering = {
        let layer = Arc::clone(&layer);
        tokio::spawn(async move { layer.deregister("long").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!layer.is_registered("long"));
    gate.notify_one();

    with_timeout(deregistering).await??;
    let run = with_timeout(running).await??;

    assert!(run.cancelled);
    assert_eq!(run.status_of("work"), Some(UnitStatus::Succeeded));
    assert_eq!(run.status_of("publish"), Some(UnitStatus::Skipped));
    assert!(!rec.was_invoked("publish"));

    assert!(matches!(layer.fire("long"), Err(PipedagError::PipelineNotFound(_))));
    assert!(matches!(
        layer.deregister("long").await,
        Err(PipedagError::PipelineNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn shutdown_waits_for_in_flight_runs() -> TestResult {
    init_tracing();
    let (layer, mut reports) = layer();
    let layer = Arc::new(layer);
    let rec = Recorder::new();
    let gate = Arc::new(Notify::new());

    layer
        .register(TriggerConfig::cron(MONTHLY, gated_pipeline("long", &rec, &gate)))
        .await?;
    layer
        .register(TriggerConfig::cron(MONTHLY, gated_pipeline("idle", &rec, &gate)))
        .await?;

    layer.fire("long")?;
    with_timeout(rec.wait_for("work", 1)).await;

    let stopping = {
        let layer = Arc::clone(&layer);
        tokio::spawn(async move { layer.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(layer.names().is_empty());
    assert!(!stopping.is_finished());

    gate.notify_one();
    with_timeout(stopping).await?;

    let report = next_report(&mut reports).await;
    assert_eq!(report.pipeline, "long");
    match report.result {
        ReportResult::Completed(run) => {
            assert!(run.cancelled);
            assert!(!run.succeeded());
        }
        other => panic!("expected a completed run, got {other:?}"),
    }
    assert_eq!(rec.count("work"), 1);
    assert!(!rec.was_invoked("publish"));
    Ok(())
}

#[tokio::test]
async fn missing_entry_point_creates_no_run() -> TestResult {
    init_tracing();
    let repo = write_source_repo(common::SUCCESSFUL_DEFINITION)?;
    let (layer, mut reports) = layer();
    let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new(repo.path().join(".cache")));

    let source = SourceDescriptor::new(repo.path().to_string_lossy(), "pipelines.toml:run_docker_from_hub");
    let registered = layer
        .register(TriggerConfig::external_signal("from-repo", source, resolver))
        .await?;
    assert!(registered.is_none());
    assert_eq!(
        layer.mode_of("from-repo").map(|m| matches!(m, TriggerMode::ExternalSignal(_))),
        Some(true)
    );

    layer.signal("from-repo")?;
    let report = next_report(&mut reports).await;
    assert_eq!(report.reason, FireReason::Signal);
    match report.result {
        ReportResult::NotStarted(message) => assert!(message.contains("not found"), "{message}"),
        ReportResult::Completed(run) => panic!("no run expected, got {run}"),
    }

    match with_timeout(layer.invoke("from-repo")).await {
        Err(PipedagError::SourceResolutionError(message)) => {
            assert!(message.contains("run_docker_from_hub"))
        }
        other => panic!("expected SourceResolutionError, got {other:?}"),
    }

    layer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn signal_resolves_and_runs_the_source_definition() -> TestResult {
    init_tracing();
    let repo = write_source_repo(common::SUCCESSFUL_DEFINITION)?;
    let (layer, mut reports) = layer();
    let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new(repo.path().join(".cache")));

    let source = SourceDescriptor::new(repo.path().to_string_lossy(), "pipelines.toml:build-and-run");
    layer
        .register(TriggerConfig::external_signal("from-repo", source, resolver))
        .await?;

    layer.signal("from-repo")?;
    match next_report(&mut reports).await.result {
        ReportResult::Completed(run) => {
            assert!(run.succeeded(), "{run}");
            assert_eq!(run.pipeline, "from-repo");
            assert_eq!(
                run.statuses(),
                vec![
                    ("build_container", UnitStatus::Succeeded),
                    ("run_transform", UnitStatus::Succeeded),
                ]
            );
        }
        ReportResult::NotStarted(err) => panic!("expected a run, got: {err}"),
    }

    layer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn source_units_run_inside_the_checkout() -> TestResult {
    init_tracing();
    let repo = write_source_repo(
        r#"
[pipeline.p]

[[pipeline.p.unit]]
id = "needs_repo_file"
cmd = "test -f pipelines.toml"

[[pipeline.p.unit]]
id = "explicit_workdir"
cmd = "test -f marker"
workdir = "sub"
after = ["needs_repo_file"]
"#,
    )?;
    std::fs::create_dir(repo.path().join("sub"))?;
    std::fs::write(repo.path().join("sub").join("marker"), "")?;

    // Actions default to the deployment dir, as `pipedag::run` sets it up.
    let deploy = tempfile::tempdir()?;
    let (layer, _reports) = layer_with(TriggerSettings {
        env: ActionEnv::new().with_workdir(deploy.path()),
        ..TriggerSettings::default()
    });
    let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new(deploy.path().join(".cache")));

    let source = SourceDescriptor::new(repo.path().to_string_lossy(), "pipelines.toml:p");
    layer
        .register(TriggerConfig::external_signal("p", source, resolver))
        .await?;

    let run = with_timeout(layer.invoke("p")).await?;
    assert!(run.succeeded(), "{run}");

    layer.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn editing_the_entry_point_fires_a_signal() -> TestResult {
    init_tracing();
    let repo = write_source_repo(common::SUCCESSFUL_DEFINITION)?;
    let (layer, mut reports) = layer();
    let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new(repo.path().join(".cache")));

    let source = SourceDescriptor::new(repo.path().to_string_lossy(), "pipelines.toml:build-and-run");
    layer
        .register(TriggerConfig::external_signal("watched", source, resolver))
        .await?;

    // Let the watcher record its baseline fingerprint first.
    tokio::time::sleep(Duration::from_millis(300)).await;
    std::fs::write(
        repo.path().join("pipelines.toml"),
        format!("{}\n# touched\n", common::SUCCESSFUL_DEFINITION),
    )?;

    // A write can surface as several notifications; wait for the first run.
    let run = with_timeout(async {
        loop {
            let report = reports.recv().await.expect("report channel closed");
            assert_eq!(report.reason, FireReason::Signal);
            if let ReportResult::Completed(run) = report.result {
                return run;
            }
        }
    })
    .await;
    assert!(run.succeeded(), "{run}");

    layer.shutdown().await;
    Ok(())
}
