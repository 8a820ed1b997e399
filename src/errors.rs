// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipedagError {
    #[error("duplicate work unit '{0}'")]
    DuplicateUnit(String),

    #[error("unit '{unit}' depends on unknown unit '{dependency}'")]
    UnknownDependency { unit: String, dependency: String },

    #[error("unit '{unit}' has unresolved dependency '{dependency}'")]
    UnresolvedDependency { unit: String, dependency: String },

    #[error("cycle detected in dependency graph: {}", .0.join(" -> "))]
    CycleDetected(Vec<String>),

    #[error("unit '{unit}' failed: {message}")]
    ActionFailure { unit: String, message: String },

    #[error("invalid cron schedule '{expression}': {message}")]
    InvalidSchedule { expression: String, message: String },

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("failed to resolve pipeline definition from source: {0}")]
    SourceResolutionError(String),

    #[error("pipeline '{0}' is already registered")]
    DuplicatePipeline(String),

    #[error("pipeline not found: {0}")]
    PipelineNotFound(String),

    #[error("trigger for pipeline '{pipeline}' was dropped: {reason}")]
    FireDropped { pipeline: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipedagError {
    /// Errors that reject a graph before any unit runs.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            PipedagError::DuplicateUnit(_)
                | PipedagError::UnknownDependency { .. }
                | PipedagError::UnresolvedDependency { .. }
                | PipedagError::CycleDetected(_)
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipedagError>;
