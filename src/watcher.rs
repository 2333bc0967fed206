//! Continuous filesystem watching.
//!
//! Wraps `notify` with an explicit single-consumer event queue: OS events are
//! funneled through a channel into one consumer task, which filters them
//! through the ignore rules, classifies them, and triggers a full rescan per
//! qualifying event. No incremental diffing — a full scan is always
//! consistent with the true filesystem state regardless of how the OS
//! notification layer ordered or coalesced events.

use anyhow::{Context as _, Result};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ignore::IgnoreMatcher;
use crate::scanner::{self, relative_slash};

/// Capacity of the OS-event queue between the notify callback and the
/// consumer task.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the broadcast channel carrying scan results to observers.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Kind of change that triggered a rescan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Add,
    Change,
    Unlink,
}

/// One watcher emission: the triggering event plus the fresh file list.
#[derive(Debug, Clone)]
pub struct WatchUpdate {
    pub event: ChangeKind,
    pub path: String,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WatchState {
    Watching,
    Closed,
}

/// Live watcher over a directory tree.
///
/// State machine: watching on construction, closed after [`close`].
/// Dropping without closing releases the OS handles too, but `close` should
/// be awaited before process exit so the consumer task finishes cleanly.
///
/// [`close`]: FileWatcher::close
pub struct FileWatcher {
    root: PathBuf,
    state: WatchState,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
    updates: broadcast::Sender<WatchUpdate>,
}

impl FileWatcher {
    /// Begin watching `root` recursively.
    ///
    /// A failure to establish the watch is a startup error; errors reported
    /// by the OS layer afterwards are logged and watching continues.
    pub fn start(root: PathBuf, matcher: IgnoreMatcher) -> Result<Self> {
        // Event paths arrive canonicalized from the OS layer; the root must
        // match or relative paths cannot be derived.
        let root = root
            .canonicalize()
            .with_context(|| format!("Watch directory does not exist: {}", root.display()))?;

        let (event_tx, event_rx) = mpsc::channel::<Result<Event, notify::Error>>(EVENT_QUEUE_CAPACITY);

        let mut watcher = notify::recommended_watcher(move |res| {
            // Dropped events on a full queue are acceptable: any later event
            // for the same burst triggers the same full rescan.
            let _ = event_tx.try_send(res);
        })
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch {}", root.display()))?;

        info!("Watching directory: {}", root.display());

        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let task = tokio::spawn(consume_events(
            root.clone(),
            matcher,
            event_rx,
            updates.clone(),
        ));

        Ok(Self {
            root,
            state: WatchState::Watching,
            watcher: Some(watcher),
            task: Some(task),
            updates,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Subscribe to watch updates. Each receiver sees every update emitted
    /// after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<WatchUpdate> {
        self.updates.subscribe()
    }

    /// Stop watching and release the OS watch handles.
    ///
    /// Idempotent — safe to call any number of times.
    pub async fn close(&mut self) {
        if self.state == WatchState::Closed {
            return;
        }
        self.state = WatchState::Closed;

        // Dropping the notify watcher releases the OS subscriptions and the
        // callback's queue sender; the consumer task then drains and exits.
        self.watcher.take();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Stopped watching {}", self.root.display());
    }
}

/// Single consumer of the OS-event queue.
async fn consume_events(
    root: PathBuf,
    matcher: IgnoreMatcher,
    mut events: mpsc::Receiver<Result<Event, notify::Error>>,
    updates: broadcast::Sender<WatchUpdate>,
) {
    while let Some(res) = events.recv().await {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                warn!("Watcher error: {}", err);
                continue;
            }
        };

        for (kind, path) in classify(&event) {
            let rel = relative_slash(&root, &path);
            if rel.is_empty() || matcher.is_ignored(&rel) {
                continue;
            }

            // Directory creation/modification is not a file event; removals
            // cannot be told apart after the fact, and a spurious rescan for
            // one is still consistent.
            if kind != ChangeKind::Unlink && path.is_dir() {
                continue;
            }

            let scan_root = root.clone();
            let scan_matcher = matcher.clone();
            let scanned =
                tokio::task::spawn_blocking(move || scanner::scan(&scan_root, &scan_matcher))
                    .await;

            let files = match scanned {
                Ok(Ok(files)) => files,
                Ok(Err(err)) => {
                    warn!("Rescan after change to {} failed: {:#}", rel, err);
                    continue;
                }
                Err(err) => {
                    warn!("Rescan task panicked: {}", err);
                    continue;
                }
            };

            debug!("{:?} {} -> {} files", kind, rel, files.len());
            let _ = updates.send(WatchUpdate {
                event: kind,
                path: rel,
                files,
            });
        }
    }
}

/// Map one notify event onto add/change/unlink transitions, one per path.
///
/// Renames become unlink-of-old plus add-of-new; when the platform cannot
/// say which side a path is on, its current existence decides.
fn classify(event: &Event) -> Vec<(ChangeKind, PathBuf)> {
    let mut out = Vec::new();

    for path in &event.paths {
        let kind = match &event.kind {
            EventKind::Create(CreateKind::Folder) => None,
            EventKind::Create(_) => Some(ChangeKind::Add),
            EventKind::Remove(RemoveKind::Folder) => None,
            EventKind::Remove(_) => Some(ChangeKind::Unlink),
            EventKind::Modify(ModifyKind::Name(mode)) => match mode {
                RenameMode::From => Some(ChangeKind::Unlink),
                RenameMode::To => Some(ChangeKind::Add),
                RenameMode::Both | RenameMode::Any | RenameMode::Other => {
                    if path.exists() {
                        Some(ChangeKind::Add)
                    } else {
                        Some(ChangeKind::Unlink)
                    }
                }
            },
            EventKind::Modify(ModifyKind::Metadata(_)) => None,
            EventKind::Modify(_) => Some(ChangeKind::Change),
            _ => None,
        };

        if let Some(kind) = kind {
            out.push((kind, path.clone()));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    const TIMEOUT: Duration = Duration::from_secs(5);

    async fn recv_update(
        rx: &mut broadcast::Receiver<WatchUpdate>,
    ) -> Option<WatchUpdate> {
        tokio::time::timeout(TIMEOUT, rx.recv()).await.ok()?.ok()
    }

    /// Wait for an update matching `path`, skipping unrelated emissions
    /// (editors and platforms differ in how many events one write produces).
    async fn recv_update_for(
        rx: &mut broadcast::Receiver<WatchUpdate>,
        path: &str,
    ) -> Option<WatchUpdate> {
        loop {
            let update = recv_update(rx).await?;
            if update.path == path {
                return Some(update);
            }
        }
    }

    #[tokio::test]
    async fn emits_add_with_fresh_file_list() {
        let tmp = TempDir::new().unwrap();
        let mut watcher =
            FileWatcher::start(tmp.path().to_path_buf(), IgnoreMatcher::new(&[])).unwrap();
        let mut rx = watcher.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::write(tmp.path().join("notes.md"), "hello").unwrap();

        let update = recv_update_for(&mut rx, "notes.md")
            .await
            .expect("no update for notes.md");
        assert!(matches!(update.event, ChangeKind::Add | ChangeKind::Change));
        assert!(update.files.contains(&"notes.md".to_string()));

        watcher.close().await;
    }

    #[tokio::test]
    async fn ignored_paths_never_emit() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("node_modules")).unwrap();

        let mut watcher =
            FileWatcher::start(tmp.path().to_path_buf(), IgnoreMatcher::new(&[])).unwrap();
        let mut rx = watcher.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::write(tmp.path().join("node_modules/pkg.js"), "x").unwrap();

        let result = tokio::time::timeout(Duration::from_millis(800), rx.recv()).await;
        assert!(result.is_err(), "ignored path produced an update");

        watcher.close().await;
    }

    #[tokio::test]
    async fn unlink_removes_from_file_list() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("doomed.txt"), "x").unwrap();

        let mut watcher =
            FileWatcher::start(tmp.path().to_path_buf(), IgnoreMatcher::new(&[])).unwrap();
        let mut rx = watcher.subscribe();

        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::remove_file(tmp.path().join("doomed.txt")).unwrap();

        let update = recv_update_for(&mut rx, "doomed.txt")
            .await
            .expect("no update for doomed.txt");
        assert_eq!(update.event, ChangeKind::Unlink);
        assert!(!update.files.contains(&"doomed.txt".to_string()));

        watcher.close().await;
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let mut watcher =
            FileWatcher::start(tmp.path().to_path_buf(), IgnoreMatcher::new(&[])).unwrap();
        watcher.close().await;
        watcher.close().await;
    }
}
