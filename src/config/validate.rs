// src/config/validate.rs

use crate::config::model::{ConfigFile, PipelineSpec, RawConfigFile};
use crate::errors::{PipedagError, Result};
use crate::template::PipelineTemplate;
use crate::trigger::CronSchedule;
use crate::types::parse_duration;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipedagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.env, raw.pipeline))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_pipelines(cfg)?;
    validate_global_config(cfg)?;
    for (name, spec) in cfg.pipeline.iter() {
        validate_pipeline(name, spec)?;
    }
    Ok(())
}

fn ensure_has_pipelines(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.is_empty() {
        return Err(PipedagError::ConfigError(
            "config must contain at least one [pipeline.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.queue_length == 0 {
        return Err(PipedagError::ConfigError(
            "[config].queue_length must be >= 1 (got 0)".to_string(),
        ));
    }

    if cfg.config.max_parallel == 0 {
        return Err(PipedagError::ConfigError(
            "[config].max_parallel must be >= 1 (got 0)".to_string(),
        ));
    }

    parse_duration(&cfg.config.poll_interval).map_err(|e| {
        PipedagError::ConfigError(format!("[config].poll_interval: {e}"))
    })?;

    Ok(())
}

/// Validate one pipeline section of a deployment file.
pub(crate) fn validate_pipeline(name: &str, spec: &PipelineSpec) -> Result<()> {
    if spec.cron.is_some() && spec.source.is_some() {
        return Err(PipedagError::ConfigError(format!(
            "pipeline '{name}' sets both `cron` and `source`; pick one trigger"
        )));
    }

    if let Some(expr) = &spec.cron {
        CronSchedule::parse(expr)?;
    }

    match &spec.source {
        Some(source) => {
            if !spec.unit.is_empty() {
                return Err(PipedagError::ConfigError(format!(
                    "pipeline '{name}' has a `source`; its units come from the source and must not be declared inline"
                )));
            }
            source.location()?;
            source.entry_point()?;
            Ok(())
        }
        None => validate_definition(name, spec),
    }
}

/// Validate a pipeline definition that must carry its own units.
///
/// Used both for inline pipelines and for definitions resolved from a
/// source repository.
pub(crate) fn validate_definition(name: &str, spec: &PipelineSpec) -> Result<()> {
    if spec.unit.is_empty() {
        return Err(PipedagError::ConfigError(format!(
            "pipeline '{name}' must declare at least one [[pipeline.{name}.unit]]"
        )));
    }

    for unit in spec.unit.iter() {
        if let Some(timeout) = &unit.timeout {
            parse_duration(timeout).map_err(|e| {
                PipedagError::ConfigError(format!(
                    "pipeline '{name}', unit '{}': invalid timeout: {e}",
                    unit.id
                ))
            })?;
        }
    }

    let template = PipelineTemplate::from_spec(name, spec, None)?;
    template.build_graph()?.validate()
}
