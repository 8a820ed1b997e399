// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::source::SourceDescriptor;
use crate::types::{OverlapBehaviour, parse_duration};

/// Top-level deployment file as read from TOML.
///
/// ```toml
/// [config]
/// overlap = "queue"
/// queue_length = 1
/// max_parallel = 4
///
/// [env]
/// PROJECT = "zoomcamp"
///
/// [pipeline.build-and-run]
/// cron = "0 0 1 * *"
///
/// [[pipeline.build-and-run.unit]]
/// id = "build_container"
/// cmd = "docker build -t zoomcamp-image ."
///
/// [[pipeline.build-and-run.unit]]
/// id = "run_transform"
/// cmd = "dbt run --project-dir zoomcamp_dbt"
/// after = ["build_container"]
/// ```
///
/// All sections except `[pipeline.*]` are optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Variables handed to every action.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Pipeline definitions keyed by name.
    #[serde(default)]
    pub pipeline: BTreeMap<String, PipelineSpec>,
}

/// Validated deployment file. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub env: BTreeMap<String, String>,
    pub pipeline: BTreeMap<String, PipelineSpec>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        env: BTreeMap<String, String>,
        pipeline: BTreeMap<String, PipelineSpec>,
    ) -> Self {
        Self {
            config,
            env,
            pipeline,
        }
    }

    /// Poll interval for remote sources. Validated at load time.
    pub fn poll_interval(&self) -> Duration {
        parse_duration(&self.config.poll_interval).unwrap_or(DEFAULT_POLL_INTERVAL)
    }
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// What to do with fires that arrive while a run is active.
    #[serde(default)]
    pub overlap: OverlapBehaviour,

    /// Maximum number of pending fires kept per pipeline.
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// Maximum number of actions in flight within one run.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Where remote sources are cloned, relative to the config file.
    #[serde(default = "default_source_cache_dir")]
    pub source_cache_dir: PathBuf,

    /// How often remote sources are checked for changes, e.g. `"60s"`.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

fn default_queue_length() -> usize {
    1
}

fn default_max_parallel() -> usize {
    crate::engine::DEFAULT_MAX_PARALLEL
}

fn default_source_cache_dir() -> PathBuf {
    PathBuf::from(".pipedag/sources")
}

fn default_poll_interval() -> String {
    "60s".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            overlap: OverlapBehaviour::default(),
            queue_length: default_queue_length(),
            max_parallel: default_max_parallel(),
            source_cache_dir: default_source_cache_dir(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// `[pipeline.<name>]` section.
///
/// The trigger is implied by which keys are present:
/// - `cron = "..."`: scheduled.
/// - `source = { ... }`: runs on source changes; units come from the source.
/// - neither: runs once, immediately.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpec {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default)]
    pub cron: Option<String>,

    #[serde(default)]
    pub source: Option<SourceDescriptor>,

    /// Units in declaration order (`[[pipeline.<name>.unit]]`).
    #[serde(default)]
    pub unit: Vec<UnitSpec>,
}

/// Which trigger a pipeline section asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerKind<'a> {
    Immediate,
    Cron(&'a str),
    Source(&'a SourceDescriptor),
}

impl PipelineSpec {
    /// Trigger implied by the section. When both `cron` and `source` are set
    /// (rejected by validation) `cron` wins.
    pub fn trigger_kind(&self) -> TriggerKind<'_> {
        match (&self.cron, &self.source) {
            (Some(expr), _) => TriggerKind::Cron(expr),
            (None, Some(source)) => TriggerKind::Source(source),
            (None, None) => TriggerKind::Immediate,
        }
    }
}

/// `[[pipeline.<name>.unit]]` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    pub id: String,

    /// Shell command to run.
    pub cmd: String,

    /// Units that must succeed first.
    #[serde(default)]
    pub after: Vec<String>,

    /// Extra variables for this unit, layered over `[env]`.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Working directory, relative to the config file (or source checkout).
    #[serde(default)]
    pub workdir: Option<PathBuf>,

    /// Self-imposed timeout, e.g. `"2h"`.
    #[serde(default)]
    pub timeout: Option<String>,
}

/// Pipeline definition file found at a source entry point.
///
/// Same `[pipeline.<name>]` layout as the deployment file, without the
/// global sections.
#[derive(Debug, Clone, Deserialize)]
pub struct DefinitionFile {
    #[serde(default)]
    pub pipeline: BTreeMap<String, PipelineSpec>,
}
