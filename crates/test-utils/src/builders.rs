#![allow(dead_code)]

use std::collections::BTreeMap;

use pipedag::config::{ConfigFile, ConfigSection, PipelineSpec, RawConfigFile, UnitSpec};
use pipedag::errors::Result;
use pipedag::source::SourceDescriptor;
use pipedag::types::OverlapBehaviour;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                env: BTreeMap::new(),
                pipeline: BTreeMap::new(),
            },
        }
    }

    pub fn with_pipeline(mut self, name: &str, pipeline: PipelineSpec) -> Self {
        self.config.pipeline.insert(name.to_string(), pipeline);
        self
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.config.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn overlap(mut self, overlap: OverlapBehaviour) -> Self {
        self.config.config.overlap = overlap;
        self
    }

    pub fn queue_length(mut self, len: usize) -> Self {
        self.config.config.queue_length = len;
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.config.max_parallel = n;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `PipelineSpec`.
pub struct PipelineSpecBuilder {
    spec: PipelineSpec,
}

impl PipelineSpecBuilder {
    pub fn new() -> Self {
        Self {
            spec: PipelineSpec::default(),
        }
    }

    pub fn description(mut self, text: &str) -> Self {
        self.spec.description = Some(text.to_string());
        self
    }

    pub fn tag(mut self, tag: &str) -> Self {
        self.spec.tags.push(tag.to_string());
        self
    }

    pub fn cron(mut self, expr: &str) -> Self {
        self.spec.cron = Some(expr.to_string());
        self
    }

    pub fn source(mut self, repository_url: &str, entry_point: &str) -> Self {
        self.spec.source = Some(SourceDescriptor::new(repository_url, entry_point));
        self
    }

    pub fn unit(mut self, unit: UnitSpec) -> Self {
        self.spec.unit.push(unit);
        self
    }

    pub fn build(self) -> PipelineSpec {
        self.spec
    }
}

impl Default for PipelineSpecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `UnitSpec`.
pub struct UnitSpecBuilder {
    unit: UnitSpec,
}

impl UnitSpecBuilder {
    pub fn new(id: &str, cmd: &str) -> Self {
        Self {
            unit: UnitSpec {
                id: id.to_string(),
                cmd: cmd.to_string(),
                after: vec![],
                env: BTreeMap::new(),
                workdir: None,
                timeout: None,
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.unit.after.push(dep.to_string());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.unit.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn workdir(mut self, dir: &str) -> Self {
        self.unit.workdir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.unit.timeout = Some(timeout.to_string());
        self
    }

    pub fn build(self) -> UnitSpec {
        self.unit
    }
}
