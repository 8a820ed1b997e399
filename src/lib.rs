// src/lib.rs

pub mod action;
pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod source;
pub mod template;
pub mod trigger;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::action::ActionEnv;
use crate::cli::CliArgs;
use crate::config::loader::load_and_validate;
use crate::config::model::{ConfigFile, PipelineSpec, TriggerKind};
use crate::engine::{EngineOptions, ExecutionEngine, PipelineRun};
use crate::errors::PipedagError;
use crate::source::{GitSourceResolver, SourceDescriptor, SourceLocation, SourceResolver};
use crate::template::PipelineTemplate;
use crate::trigger::{
    CronSchedule, ReportResult, RunReport, TriggerConfig, TriggerLayer, TriggerMode,
    TriggerSettings,
};

/// High-level entry point used by `main.rs`. Returns the process exit code.
///
/// This wires together:
/// - config loading and pipeline selection
/// - the execution engine and trigger layer
/// - the source resolver for `source = {...}` pipelines
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<i32> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let root = config_root_dir(&config_path);

    let selected = select_pipelines(&cfg, &args.pipelines)?;

    if args.dry_run {
        print_dry_run(&cfg, &selected);
        return Ok(0);
    }

    let engine = ExecutionEngine::new(EngineOptions {
        max_parallel: cfg.config.max_parallel,
    });
    let settings = TriggerSettings {
        overlap: cfg.config.overlap,
        queue_length: cfg.config.queue_length,
        poll_interval: cfg.poll_interval(),
        env: ActionEnv {
            vars: cfg.env.clone(),
            workdir: Some(root.clone()),
        },
    };
    let resolver: Arc<dyn SourceResolver> =
        Arc::new(GitSourceResolver::new(root.join(&cfg.config.source_cache_dir)));

    let mut configs = Vec::with_capacity(selected.len());
    for name in selected.iter() {
        let spec = &cfg.pipeline[name.as_str()];
        let mut config = trigger_config(name, spec, &root, &resolver)?;
        if args.once {
            config.mode = TriggerMode::Immediate;
        }
        configs.push(config);
    }

    let (layer, reports) = TriggerLayer::new(engine, settings, resolver);
    let layer = Arc::new(layer);

    if args.once {
        drop(reports);
        run_once(layer, configs).await
    } else {
        serve(layer, configs, reports).await
    }
}

/// Run every pipeline once, concurrently, and print the outcomes.
async fn run_once(layer: Arc<TriggerLayer>, configs: Vec<TriggerConfig>) -> Result<i32> {
    let mut runs: JoinSet<(String, errors::Result<Option<PipelineRun>>)> = JoinSet::new();
    for config in configs {
        let layer = Arc::clone(&layer);
        runs.spawn(async move {
            let name = config.name().to_string();
            (name, layer.register(config).await)
        });
    }

    let mut failed = 0usize;
    while let Some(joined) = runs.join_next().await {
        let (name, result) = joined?;
        match result {
            Ok(Some(run)) => {
                print!("{run}");
                if !run.succeeded() {
                    failed += 1;
                }
            }
            Ok(None) => debug!(pipeline = %name, "registration produced no run"),
            Err(err) => {
                println!("pipeline '{name}' did not run: {err}");
                failed += 1;
            }
        }
    }

    layer.shutdown().await;

    if failed > 0 {
        warn!(failed, "some pipelines failed");
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Register every pipeline and serve until Ctrl-C.
async fn serve(
    layer: Arc<TriggerLayer>,
    configs: Vec<TriggerConfig>,
    mut reports: tokio::sync::mpsc::UnboundedReceiver<RunReport>,
) -> Result<i32> {
    let printer = tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            print_report(&report);
        }
    });

    // Immediate pipelines run during registration; register them off the
    // main task so scheduled ones are armed without waiting.
    let mut registrations = JoinSet::new();
    for config in configs {
        let layer = Arc::clone(&layer);
        registrations.spawn(async move {
            let name = config.name().to_string();
            let mode = config.mode.clone();
            match layer.register(config).await {
                Ok(_) => info!(pipeline = %name, mode = %mode, "pipeline armed"),
                Err(err) => error!(pipeline = %name, error = %err, "registration failed"),
            }
        });
    }

    info!("pipedag serving; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown requested");

    registrations.abort_all();
    while registrations.join_next().await.is_some() {}
    layer.shutdown().await;
    drop(layer);

    if let Err(e) = printer.await {
        debug!(error = %e, "report printer ended abnormally");
    }
    Ok(0)
}

fn print_report(report: &RunReport) {
    match &report.result {
        ReportResult::Completed(run) => print!("{run}"),
        ReportResult::NotStarted(err) => println!(
            "pipeline '{}' ({} fire) did not run: {err}",
            report.pipeline, report.reason
        ),
    }
}

/// Build the trigger configuration implied by a pipeline section.
pub fn trigger_config(
    name: &str,
    spec: &PipelineSpec,
    root: &Path,
    resolver: &Arc<dyn SourceResolver>,
) -> errors::Result<TriggerConfig> {
    match spec.trigger_kind() {
        TriggerKind::Immediate => Ok(TriggerConfig::immediate(Arc::new(
            PipelineTemplate::from_spec(name, spec, Some(root))?,
        ))),
        TriggerKind::Cron(expr) => Ok(TriggerConfig::cron(
            expr,
            Arc::new(PipelineTemplate::from_spec(name, spec, Some(root))?),
        )),
        TriggerKind::Source(source) => Ok(TriggerConfig::external_signal(
            name,
            anchor_source(source, root)?,
            Arc::clone(resolver),
        )),
    }
}

/// Resolve a relative local repository path against the config directory.
fn anchor_source(source: &SourceDescriptor, root: &Path) -> errors::Result<SourceDescriptor> {
    match source.location()? {
        SourceLocation::Local(dir) if dir.is_relative() => Ok(SourceDescriptor::new(
            root.join(dir).to_string_lossy(),
            source.entry_point.clone(),
        )),
        _ => Ok(source.clone()),
    }
}

/// Names of the pipelines to act on, in config order.
fn select_pipelines(cfg: &ConfigFile, filter: &[String]) -> errors::Result<Vec<String>> {
    if filter.is_empty() {
        return Ok(cfg.pipeline.keys().cloned().collect());
    }

    for name in filter {
        if !cfg.pipeline.contains_key(name) {
            return Err(PipedagError::PipelineNotFound(name.clone()));
        }
    }

    Ok(cfg
        .pipeline
        .keys()
        .filter(|name| filter.contains(name))
        .cloned()
        .collect())
}

/// Figure out a sensible base directory for relative paths.
///
/// - If the config path has a non-empty parent (e.g. "deploy/Pipedag.toml"),
///   we use that directory, made absolute.
/// - If it's just a bare filename like "Pipedag.toml" (parent = ""),
///   we fall back to the current working directory "."
///
/// Unit workdirs are layered on top of this one, so it must not be relative.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            std::path::absolute(parent).unwrap_or_else(|_| parent.to_path_buf())
        }
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Print pipelines, triggers and run order without executing anything.
fn print_dry_run(cfg: &ConfigFile, selected: &[String]) {
    println!("pipedag dry-run");
    println!("  config.overlap = {:?}", cfg.config.overlap);
    println!("  config.queue_length = {}", cfg.config.queue_length);
    println!("  config.max_parallel = {}", cfg.config.max_parallel);
    if !cfg.env.is_empty() {
        println!("  env: {:?}", cfg.env.keys().collect::<Vec<_>>());
    }
    println!();

    println!("pipelines ({}):", selected.len());
    for name in selected {
        let spec = &cfg.pipeline[name.as_str()];
        println!("  - {name}");
        if let Some(description) = &spec.description {
            println!("      description: {description}");
        }
        if !spec.tags.is_empty() {
            println!("      tags: {:?}", spec.tags);
        }

        match spec.trigger_kind() {
            TriggerKind::Immediate => println!("      trigger: immediate"),
            TriggerKind::Cron(expr) => {
                println!("      trigger: cron \"{expr}\"");
                if let Ok(schedule) = CronSchedule::parse(expr) {
                    if let Some(next) = schedule.next_after(Utc::now()) {
                        println!("      next fire: {next}");
                    }
                }
            }
            TriggerKind::Source(source) => {
                println!(
                    "      trigger: source {} ({})",
                    source.repository_url, source.entry_point
                );
                println!("      units: resolved from the source at fire time");
                continue;
            }
        }

        let Ok(graph) = PipelineTemplate::from_spec(name, spec, None).and_then(|t| t.build_graph())
        else {
            continue;
        };
        println!("      order:");
        for id in graph.topological_order() {
            let unit = spec.unit.iter().find(|u| u.id == id);
            match unit {
                Some(unit) if !unit.after.is_empty() => {
                    println!("        {id}: {} (after {:?})", unit.cmd, unit.after)
                }
                Some(unit) => println!("        {id}: {}", unit.cmd),
                None => println!("        {id}"),
            }
        }
    }

    debug!("dry-run complete (no execution)");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    fn config(toml: &str) -> ConfigFile {
        ConfigFile::try_from(load_from_str(toml).unwrap()).unwrap()
    }

    const TWO_PIPELINES: &str = r#"
[pipeline.a]
[[pipeline.a.unit]]
id = "x"
cmd = "true"

[pipeline.b]
cron = "0 0 1 * *"
[[pipeline.b.unit]]
id = "y"
cmd = "true"
"#;

    #[test]
    fn selects_all_or_the_named_pipelines() {
        let cfg = config(TWO_PIPELINES);
        assert_eq!(select_pipelines(&cfg, &[]).unwrap(), vec!["a", "b"]);
        assert_eq!(select_pipelines(&cfg, &["b".to_string()]).unwrap(), vec!["b"]);
        assert!(matches!(
            select_pipelines(&cfg, &["c".to_string()]),
            Err(PipedagError::PipelineNotFound(_))
        ));
    }

    #[test]
    fn trigger_config_follows_the_section() {
        let cfg = config(TWO_PIPELINES);
        let resolver: Arc<dyn SourceResolver> = Arc::new(GitSourceResolver::new("/tmp/cache"));

        let a = trigger_config("a", &cfg.pipeline["a"], Path::new("/srv"), &resolver).unwrap();
        assert_eq!(a.mode, TriggerMode::Immediate);

        let b = trigger_config("b", &cfg.pipeline["b"], Path::new("/srv"), &resolver).unwrap();
        assert_eq!(b.mode, TriggerMode::Cron("0 0 1 * *".to_string()));
        assert_eq!(b.name(), "b");
    }

    #[test]
    fn relative_local_sources_are_anchored_to_the_config_dir() {
        let source = SourceDescriptor::new("checkouts/repo", "p.toml:x");
        let anchored = anchor_source(&source, Path::new("/srv/deploy")).unwrap();
        assert_eq!(anchored.repository_url, "/srv/deploy/checkouts/repo");

        let remote = SourceDescriptor::new("https://example.com/org/repo.git", "p.toml:x");
        assert_eq!(anchor_source(&remote, Path::new("/srv")).unwrap(), remote);
    }

    #[test]
    fn config_root_is_always_absolute() {
        assert!(config_root_dir(Path::new("Pipedag.toml")).is_absolute());
        assert!(config_root_dir(Path::new("deploy/Pipedag.toml")).is_absolute());
        assert_eq!(
            config_root_dir(Path::new("/srv/deploy/Pipedag.toml")),
            PathBuf::from("/srv/deploy")
        );
    }
}
