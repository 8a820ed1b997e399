// src/source/resolver.rs

//! Fetching pipeline definitions from source repositories.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::process::Command;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::config::DefinitionFile;
use crate::config::validate::validate_definition;
use crate::errors::{PipedagError, Result};
use crate::source::descriptor::{EntryPoint, SourceDescriptor, SourceLocation};
use crate::source::hash::{cache_key, hash_bytes};
use crate::template::PipelineTemplate;

/// Boxed future used by [`SourceResolver`] methods.
pub type SourceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Turns a [`SourceDescriptor`] into a pipeline definition.
///
/// Every failure is reported as `SourceResolutionError`.
pub trait SourceResolver: Send + Sync {
    /// Fetch the source and load the pipeline named by the entry point.
    fn resolve<'a>(&'a self, source: &'a SourceDescriptor) -> SourceFuture<'a, PipelineTemplate>;

    /// Cheap fingerprint of the current state of the source, used to decide
    /// whether a change notification is real.
    fn fingerprint<'a>(&'a self, source: &'a SourceDescriptor) -> SourceFuture<'a, String>;
}

/// Resolver for local checkouts and git remotes.
///
/// Remote repositories are cloned shallowly into `cache_dir/<key>`, where
/// `key` is derived from the URL, and fast-forwarded on later resolutions.
/// Pipelines sharing a remote share its checkout; clones share the locks, so
/// only one of them touches a checkout at a time.
#[derive(Debug, Clone)]
pub struct GitSourceResolver {
    cache_dir: PathBuf,
    checkouts: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl GitSourceResolver {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            checkouts: Arc::default(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    async fn resolve_inner(&self, source: &SourceDescriptor) -> Result<PipelineTemplate> {
        let entry = source.entry_point().map_err(into_resolution_error)?;
        // Held until the definition is read so a concurrent pull cannot move
        // the checkout underneath us.
        let (repo_dir, _guard) = match source.location().map_err(into_resolution_error)? {
            SourceLocation::Local(dir) => (dir, None),
            SourceLocation::Remote(url) => {
                let (dir, guard) = self.checkout(&url).await?;
                (dir, Some(guard))
            }
        };

        let file = repo_dir.join(&entry.path);
        debug!(file = %file.display(), pipeline = %entry.pipeline, "reading pipeline definition");

        let contents = tokio::fs::read_to_string(&file).await.map_err(|e| {
            PipedagError::SourceResolutionError(format!(
                "entry point file '{}' could not be read: {e}",
                entry.path.display()
            ))
        })?;

        parse_definition(&contents, &entry, &repo_dir)
    }

    async fn fingerprint_inner(&self, source: &SourceDescriptor) -> Result<String> {
        match source.location().map_err(into_resolution_error)? {
            SourceLocation::Local(dir) => {
                let entry = source.entry_point().map_err(into_resolution_error)?;
                let bytes = tokio::fs::read(dir.join(&entry.path)).await.map_err(|e| {
                    PipedagError::SourceResolutionError(format!(
                        "entry point file '{}' could not be read: {e}",
                        entry.path.display()
                    ))
                })?;
                Ok(hash_bytes(&bytes))
            }
            SourceLocation::Remote(url) => {
                let head = git([OsStr::new("ls-remote"), OsStr::new(&url), OsStr::new("HEAD")]).await?;
                Ok(hash_bytes(head.as_bytes()))
            }
        }
    }

    /// Clone or update the cached checkout of `url`. The returned guard keeps
    /// other resolutions of the same checkout waiting.
    async fn checkout(&self, url: &str) -> Result<(PathBuf, OwnedMutexGuard<()>)> {
        let dir = self.cache_dir.join(cache_key(url));
        let guard = self.checkout_lock(&dir).lock_owned().await;

        if dir.join(".git").is_dir() {
            debug!(url, dir = %dir.display(), "updating cached checkout");
            git([
                OsStr::new("-C"),
                dir.as_os_str(),
                OsStr::new("pull"),
                OsStr::new("--ff-only"),
                OsStr::new("--quiet"),
            ])
            .await?;
        } else {
            info!(url, dir = %dir.display(), "cloning source repository");
            tokio::fs::create_dir_all(&self.cache_dir).await.map_err(|e| {
                PipedagError::SourceResolutionError(format!(
                    "cannot create source cache '{}': {e}",
                    self.cache_dir.display()
                ))
            })?;
            git([
                OsStr::new("clone"),
                OsStr::new("--depth"),
                OsStr::new("1"),
                OsStr::new("--quiet"),
                OsStr::new(url),
                dir.as_os_str(),
            ])
            .await?;
        }

        Ok((dir, guard))
    }

    fn checkout_lock(&self, dir: &Path) -> Arc<AsyncMutex<()>> {
        let mut checkouts = self
            .checkouts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(checkouts.entry(dir.to_path_buf()).or_default())
    }
}

impl SourceResolver for GitSourceResolver {
    fn resolve<'a>(&'a self, source: &'a SourceDescriptor) -> SourceFuture<'a, PipelineTemplate> {
        Box::pin(self.resolve_inner(source))
    }

    fn fingerprint<'a>(&'a self, source: &'a SourceDescriptor) -> SourceFuture<'a, String> {
        Box::pin(self.fingerprint_inner(source))
    }
}

/// Parse a definition file and pick the pipeline named by `entry`.
pub fn parse_definition(contents: &str, entry: &EntryPoint, repo_dir: &Path) -> Result<PipelineTemplate> {
    let file: DefinitionFile = toml::from_str(contents).map_err(|e| {
        PipedagError::SourceResolutionError(format!(
            "'{}' is not a valid definition file: {e}",
            entry.path.display()
        ))
    })?;

    let spec = file.pipeline.get(&entry.pipeline).ok_or_else(|| {
        PipedagError::SourceResolutionError(format!(
            "entry point '{}' not found in '{}'",
            entry.pipeline,
            entry.path.display()
        ))
    })?;

    if spec.cron.is_some() || spec.source.is_some() {
        return Err(PipedagError::SourceResolutionError(format!(
            "pipeline '{}' in '{}' declares its own trigger; resolved definitions must only list units",
            entry.pipeline,
            entry.path.display()
        )));
    }

    validate_definition(&entry.pipeline, spec).map_err(into_resolution_error)?;
    PipelineTemplate::from_spec(&entry.pipeline, spec, Some(repo_dir)).map_err(into_resolution_error)
}

fn into_resolution_error(err: PipedagError) -> PipedagError {
    match err {
        PipedagError::SourceResolutionError(_) => err,
        other => PipedagError::SourceResolutionError(other.to_string()),
    }
}

/// Run `git` and return its stdout.
async fn git<I, S>(args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<_> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    let rendered = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ");

    let output = Command::new("git")
        .args(&args)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .await
        .map_err(|e| PipedagError::SourceResolutionError(format!("running `git {rendered}`: {e}")))?;

    if !output.status.success() {
        return Err(PipedagError::SourceResolutionError(format!(
            "`git {rendered}` failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
