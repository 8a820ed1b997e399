// src/template.rs

//! Graph templates: the "what to run" half of a registration.
//!
//! A template is instantiated into a fresh [`DependencyGraph`] for every run,
//! so no status or action state leaks between runs. The same template type
//! serves every trigger mode; only the [`TriggerConfig`] differs.
//!
//! [`TriggerConfig`]: crate::trigger::TriggerConfig

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use crate::action::{Action, ActionEnv, CommandAction};
use crate::config::PipelineSpec;
use crate::dag::{DependencyGraph, GraphBuilder, UnitId};
use crate::errors::{PipedagError, Result};
use crate::source::{SourceDescriptor, SourceResolver};
use crate::types::parse_duration;

/// Boxed future returned by [`GraphTemplate::instantiate`].
pub type GraphFuture<'a> = Pin<Box<dyn Future<Output = Result<DependencyGraph>> + Send + 'a>>;

/// Something that can produce a new dependency graph per run.
pub trait GraphTemplate: Send + Sync {
    fn name(&self) -> &str;

    /// Build a fresh graph for one run.
    fn instantiate(&self) -> GraphFuture<'_>;
}

/// One unit of a [`PipelineTemplate`].
#[derive(Clone)]
pub struct UnitTemplate {
    pub id: UnitId,
    pub action: Arc<dyn Action>,
    pub after: Vec<UnitId>,
}

impl fmt::Debug for UnitTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitTemplate")
            .field("id", &self.id)
            .field("action", &self.action.describe())
            .field("after", &self.after)
            .finish()
    }
}

/// A pipeline definition held in memory.
#[derive(Debug, Clone)]
pub struct PipelineTemplate {
    name: String,
    description: Option<String>,
    tags: Vec<String>,
    units: Vec<UnitTemplate>,
}

impl PipelineTemplate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            tags: Vec::new(),
            units: Vec::new(),
        }
    }

    pub fn with_unit<I, S>(mut self, id: impl Into<UnitId>, action: Arc<dyn Action>, after: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UnitId>,
    {
        self.units.push(UnitTemplate {
            id: id.into(),
            action,
            after: after.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Build a template of shell-command units from a config section.
    ///
    /// When `base_dir` is given (the config file's directory or a source
    /// checkout), units run there unless they name a workdir, and relative
    /// workdirs are resolved against it.
    pub fn from_spec(name: &str, spec: &PipelineSpec, base_dir: Option<&Path>) -> Result<Self> {
        let mut template = PipelineTemplate::new(name).with_tags(spec.tags.iter().cloned());
        template.description = spec.description.clone();

        for unit in spec.unit.iter() {
            let timeout = unit
                .timeout
                .as_deref()
                .map(parse_duration)
                .transpose()
                .map_err(|e| {
                    PipedagError::ConfigError(format!(
                        "pipeline '{name}', unit '{}': invalid timeout: {e}",
                        unit.id
                    ))
                })?;

            let workdir = match (&unit.workdir, base_dir) {
                (Some(dir), Some(base)) if dir.is_relative() => Some(base.join(dir)),
                (None, Some(base)) => Some(base.to_path_buf()),
                (dir, _) => dir.clone(),
            };

            let env = ActionEnv {
                vars: unit.env.clone(),
                workdir,
            };

            let action = CommandAction::new(unit.cmd.clone())
                .with_env(env)
                .with_timeout(timeout);

            template = template.with_unit(unit.id.clone(), Arc::new(action), unit.after.iter().cloned());
        }

        Ok(template)
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn units(&self) -> &[UnitTemplate] {
        &self.units
    }

    /// Synchronous instantiation.
    pub fn build_graph(&self) -> Result<DependencyGraph> {
        let mut builder = GraphBuilder::new();
        for unit in self.units.iter() {
            builder.push(unit.id.clone(), Arc::clone(&unit.action), unit.after.iter().cloned());
        }
        builder.build()
    }
}

impl GraphTemplate for PipelineTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self) -> GraphFuture<'_> {
        Box::pin(async move { self.build_graph() })
    }
}

/// A template whose definition lives in a source repository.
///
/// Every instantiation resolves the entry point afresh, so a run always uses
/// the definition as it is in the source at fire time.
pub struct SourceTemplate {
    name: String,
    descriptor: SourceDescriptor,
    resolver: Arc<dyn SourceResolver>,
}

impl SourceTemplate {
    pub fn new(
        name: impl Into<String>,
        descriptor: SourceDescriptor,
        resolver: Arc<dyn SourceResolver>,
    ) -> Self {
        Self {
            name: name.into(),
            descriptor,
            resolver,
        }
    }

    pub fn descriptor(&self) -> &SourceDescriptor {
        &self.descriptor
    }
}

impl fmt::Debug for SourceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceTemplate")
            .field("name", &self.name)
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl GraphTemplate for SourceTemplate {
    fn name(&self) -> &str {
        &self.name
    }

    fn instantiate(&self) -> GraphFuture<'_> {
        Box::pin(async move {
            let template = self.resolver.resolve(&self.descriptor).await?;
            template.build_graph()
        })
    }
}
