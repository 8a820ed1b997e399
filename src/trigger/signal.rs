// src/trigger/signal.rs

//! Change subscriptions for `ExternalSignal` triggers.
//!
//! Local repositories are watched with `notify`; remote ones are polled. In
//! both cases the source's fingerprint decides whether anything changed, so
//! editor temp files or an unchanged remote HEAD never fire a run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::errors::{PipedagError, Result};
use crate::source::{SourceDescriptor, SourceLocation, SourceResolver};
use crate::trigger::FireReason;
use crate::trigger::supervisor::SupervisorHandle;

/// Keeps a source subscription alive. Dropping it stops the subscription.
pub struct SignalWatcher {
    _watcher: Option<RecommendedWatcher>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for SignalWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalWatcher")
            .field("filesystem", &self._watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for SignalWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribe to changes of `source` and fire `handle` with
/// [`FireReason::Signal`] whenever its fingerprint changes.
pub fn spawn_signal_watcher(
    source: SourceDescriptor,
    resolver: Arc<dyn SourceResolver>,
    poll_interval: Duration,
    handle: SupervisorHandle,
) -> Result<SignalWatcher> {
    match source.location()? {
        SourceLocation::Local(dir) => watch_local(dir, source, resolver, handle),
        SourceLocation::Remote(url) => {
            info!(pipeline = %handle.pipeline(), url = %url, ?poll_interval, "polling remote source");
            let task = tokio::spawn(poll_remote(source, resolver, poll_interval, handle));
            Ok(SignalWatcher {
                _watcher: None,
                task,
            })
        }
    }
}

fn watch_local(
    dir: PathBuf,
    source: SourceDescriptor,
    resolver: Arc<dyn SourceResolver>,
    handle: SupervisorHandle,
) -> Result<SignalWatcher> {
    let dir = dir.canonicalize().unwrap_or(dir);

    // Channel from the blocking notify callback into the async world.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(err) => warn!(error = %err, "source watch error"),
        },
        Config::default(),
    )
    .map_err(|e| PipedagError::InvalidSource(format!("cannot watch '{}': {e}", dir.display())))?;

    watcher
        .watch(&dir, RecursiveMode::Recursive)
        .map_err(|e| PipedagError::InvalidSource(format!("cannot watch '{}': {e}", dir.display())))?;

    info!(pipeline = %handle.pipeline(), dir = %dir.display(), "watching local source");

    let task = tokio::spawn(async move {
        let mut last = current_fingerprint(&*resolver, &source).await;

        while let Some(event) = event_rx.recv().await {
            if event.paths.iter().all(|p| in_git_dir(p)) {
                continue;
            }
            debug!(pipeline = %handle.pipeline(), ?event.kind, "source change notification");

            let now = current_fingerprint(&*resolver, &source).await;
            if now == last {
                continue;
            }
            last = now;

            if handle.fire(FireReason::Signal).is_err() {
                break;
            }
        }
        debug!(pipeline = %handle.pipeline(), "local source watch finished");
    });

    Ok(SignalWatcher {
        _watcher: Some(watcher),
        task,
    })
}

async fn poll_remote(
    source: SourceDescriptor,
    resolver: Arc<dyn SourceResolver>,
    poll_interval: Duration,
    handle: SupervisorHandle,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // The first tick completes immediately and establishes the baseline.
    ticker.tick().await;
    let mut last = current_fingerprint(&*resolver, &source).await;

    loop {
        ticker.tick().await;

        let now = current_fingerprint(&*resolver, &source).await;
        if now == last {
            continue;
        }
        debug!(pipeline = %handle.pipeline(), "remote source moved");
        last = now;

        if handle.fire(FireReason::Signal).is_err() {
            break;
        }
    }
}

/// `None` when the source cannot be read right now. A transition to `None`
/// still counts as a change, so a deleted entry point surfaces as a failed
/// resolution instead of silence.
async fn current_fingerprint(resolver: &dyn SourceResolver, source: &SourceDescriptor) -> Option<String> {
    match resolver.fingerprint(source).await {
        Ok(fp) => Some(fp),
        Err(err) => {
            warn!(repository = %source.repository_url, error = %err, "cannot fingerprint source");
            None
        }
    }
}

fn in_git_dir(path: &std::path::Path) -> bool {
    path.components().any(|c| c.as_os_str() == ".git")
}
