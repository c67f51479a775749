//! Directory watcher feeding the ingestion pipeline.
//!
//! A `notify` watcher forwards raw events over an unbounded channel to a
//! background tokio task. The task keeps one deadline per path and only
//! ingests a file once it has been quiet for `debounce_ms`, so the burst of
//! create/modify events a single write produces becomes one ingest.
//!
//! Per-file failures are logged at `warn` and never stop the loop. Dropping
//! the [`WatchHandle`] stops both the watcher and the task.

use anyhow::{Context, Result};
use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WatchConfig;
use crate::ingest::IngestPipeline;

/// Keeps a directory watch alive. Stops watching when dropped.
pub struct WatchHandle {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
    dir: PathBuf,
}

impl WatchHandle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start watching `config.dir`, creating it if needed.
///
/// Must be called from within a tokio runtime.
pub fn spawn_watcher(pipeline: Arc<IngestPipeline>, config: &WatchConfig) -> Result<WatchHandle> {
    let dir = config.dir.clone();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create watch directory: {}", dir.display()))?;

    let (tx, rx) = mpsc::unbounded_channel::<Event>();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            // The receiver is gone only after the handle was dropped.
            let _ = tx.send(event);
        }
        Err(e) => warn!("File watch error: {}", e),
    })
    .context("Failed to create file watcher")?;

    let mode = if config.recursive {
        RecursiveMode::Recursive
    } else {
        RecursiveMode::NonRecursive
    };
    watcher
        .watch(&dir, mode)
        .with_context(|| format!("Failed to watch directory: {}", dir.display()))?;

    let debounce = Duration::from_millis(config.debounce_ms);
    let task = tokio::spawn(run_loop(pipeline, rx, debounce));

    info!(dir = %dir.display(), recursive = config.recursive, "watching for log files");

    Ok(WatchHandle {
        _watcher: watcher,
        task,
        dir,
    })
}

async fn run_loop(
    pipeline: Arc<IngestPipeline>,
    mut rx: mpsc::UnboundedReceiver<Event>,
    debounce: Duration,
) {
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next_due = pending.values().min().copied();

        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                if !is_ingest_trigger(&event.kind) {
                    continue;
                }
                for path in event.paths {
                    if path.is_dir() || !pipeline.accepts(&path) {
                        continue;
                    }
                    pending.insert(path, Instant::now() + debounce);
                }
            }
            _ = sleep_until(next_due) => {
                let now = Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, at)| **at <= now)
                    .map(|(p, _)| p.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    ingest_one(&pipeline, &path).await;
                }
            }
        }
    }

    debug!("watch loop stopped");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

async fn ingest_one(pipeline: &IngestPipeline, path: &Path) {
    if !path.is_file() {
        debug!(path = %path.display(), "file vanished before ingest");
        return;
    }
    match pipeline.ingest_file(path).await {
        Ok(n) => info!(path = %path.display(), chunks = n, "ingested changed file"),
        Err(e) => warn!(path = %path.display(), kind = e.kind(), error = %e, "skipping changed file"),
    }
}

/// Content-bearing events: creation, data writes, and renames into place.
fn is_ingest_trigger(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Name(_))
            | EventKind::Modify(ModifyKind::Any)
    )
}
