// src/source/descriptor.rs

use std::path::{Component, Path, PathBuf};

use regex::Regex;
use serde::Deserialize;

use crate::errors::{PipedagError, Result};

const REMOTE_URL_PATTERN: &str = r"^(?:(?:https?|ssh|git)://[^\s/]+/\S+|[\w.-]+@[\w.-]+:\S+)$";
const ENTRY_POINT_PATTERN: &str = r"^(?P<path>[^:\s]+\.toml):(?P<pipeline>[A-Za-z0-9_.-]+)$";

/// Reference to a pipeline definition inside a source repository.
///
/// `entry_point` has the form `<relative/path.toml>:<pipeline name>`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceDescriptor {
    pub repository_url: String,
    pub entry_point: String,
}

/// Where a repository lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceLocation {
    /// A checkout on the local filesystem (plain path or `file://` URL).
    Local(PathBuf),
    /// A git remote (`https://`, `ssh://`, `git://` or scp-style `git@host:path`).
    Remote(String),
}

/// Parsed form of [`SourceDescriptor::entry_point`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryPoint {
    pub path: PathBuf,
    pub pipeline: String,
}

impl SourceDescriptor {
    pub fn new(repository_url: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            repository_url: repository_url.into(),
            entry_point: entry_point.into(),
        }
    }

    pub fn location(&self) -> Result<SourceLocation> {
        let url = self.repository_url.trim();
        if url.is_empty() {
            return Err(PipedagError::InvalidSource(
                "repository_url is empty".to_string(),
            ));
        }

        if let Some(path) = url.strip_prefix("file://") {
            return Ok(SourceLocation::Local(PathBuf::from(path)));
        }

        let remote = Regex::new(REMOTE_URL_PATTERN).map_err(anyhow::Error::from)?;
        if remote.is_match(url) {
            return Ok(SourceLocation::Remote(url.to_string()));
        }

        if url.contains("://") {
            return Err(PipedagError::InvalidSource(format!(
                "unsupported repository url '{url}'"
            )));
        }

        Ok(SourceLocation::Local(PathBuf::from(url)))
    }

    pub fn entry_point(&self) -> Result<EntryPoint> {
        let re = Regex::new(ENTRY_POINT_PATTERN).map_err(anyhow::Error::from)?;
        let caps = re.captures(self.entry_point.trim()).ok_or_else(|| {
            PipedagError::InvalidSource(format!(
                "entry point '{}' must look like 'path/to/file.toml:pipeline'",
                self.entry_point
            ))
        })?;

        let path = PathBuf::from(&caps["path"]);
        if !is_contained(&path) {
            return Err(PipedagError::InvalidSource(format!(
                "entry point path '{}' must be relative and stay inside the repository",
                path.display()
            )));
        }

        Ok(EntryPoint {
            path,
            pipeline: caps["pipeline"].to_string(),
        })
    }

    /// Best-effort check performed at registration time.
    ///
    /// Both fields must be well formed; local repositories must also exist
    /// as directories. Remote reachability is only discovered at resolution.
    pub fn validate(&self) -> Result<()> {
        let location = self.location()?;
        self.entry_point()?;

        if let SourceLocation::Local(dir) = location {
            if !dir.is_dir() {
                return Err(PipedagError::InvalidSource(format!(
                    "local repository '{}' is not a directory",
                    dir.display()
                )));
            }
        }

        Ok(())
    }
}

fn is_contained(path: &Path) -> bool {
    path.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_repository_urls() {
        let cases = [
            ("https://github.com/org/repo.git", true),
            ("ssh://git@github.com/org/repo.git", true),
            ("git@github.com:org/repo.git", true),
            ("/srv/checkouts/repo", false),
            ("file:///srv/checkouts/repo", false),
            ("relative/repo", false),
        ];

        for (url, remote) in cases {
            let location = SourceDescriptor::new(url, "p.toml:x").location().unwrap();
            assert_eq!(matches!(location, SourceLocation::Remote(_)), remote, "{url}");
        }

        assert_eq!(
            SourceDescriptor::new("file:///srv/repo", "p.toml:x").location().unwrap(),
            SourceLocation::Local(PathBuf::from("/srv/repo"))
        );
    }

    #[test]
    fn rejects_unsupported_urls() {
        for url in ["", "   ", "ftp://example.com/repo"] {
            let err = SourceDescriptor::new(url, "p.toml:x").location().unwrap_err();
            assert!(matches!(err, PipedagError::InvalidSource(_)), "{url}");
        }
    }

    #[test]
    fn parses_entry_points() {
        let ep = SourceDescriptor::new("/tmp", "pipelines/main.toml:build-and-run")
            .entry_point()
            .unwrap();
        assert_eq!(ep.path, PathBuf::from("pipelines/main.toml"));
        assert_eq!(ep.pipeline, "build-and-run");
    }

    #[test]
    fn rejects_malformed_entry_points() {
        for entry in [
            "pipelines.toml",
            "pipeline.py:build_and_run_pipeline",
            "../outside.toml:x",
            "/etc/pipelines.toml:x",
            "main.toml:",
        ] {
            let err = SourceDescriptor::new("/tmp", entry).entry_point().unwrap_err();
            assert!(matches!(err, PipedagError::InvalidSource(_)), "{entry}");
        }
    }

    #[test]
    fn validate_requires_existing_local_directory() {
        let missing = SourceDescriptor::new("/definitely/not/here", "p.toml:x");
        assert!(matches!(
            missing.validate(),
            Err(PipedagError::InvalidSource(_))
        ));

        let dir = std::env::temp_dir();
        let present = SourceDescriptor::new(dir.to_string_lossy(), "p.toml:x");
        assert!(present.validate().is_ok());
    }
}
