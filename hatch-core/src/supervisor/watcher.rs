//! Source watcher feeding the supervisor's restart queue.
//!
//! `notify` delivers raw events on its own thread. They are filtered, then
//! debounced on a tokio task so a burst of saves turns into one restart
//! request.

use crate::builder::context::{matches_ignore, DEFAULT_IGNORE};
use crate::supervisor::{RestartHandle, SupervisorError};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Editor and bytecode noise that never triggers a restart.
pub fn default_watch_ignore() -> Vec<String> {
    DEFAULT_IGNORE
        .iter()
        .copied()
        .chain(["*.swp", "*.swx", "*~", "4913"])
        .map(str::to_string)
        .collect()
}

/// Watches paths and requests restarts on relevant changes.
///
/// Dropping the watcher stops both the OS watch and the debounce task.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    debounce_task: JoinHandle<()>,
}

impl FileWatcher {
    /// Starts watching `paths` recursively.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        paths: &[PathBuf],
        restart: RestartHandle,
        debounce: Duration,
        ignore: Vec<String>,
    ) -> Result<Self, SupervisorError> {
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let filter_roots: Vec<PathBuf> = paths.to_vec();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_change(&event.kind) {
                    return;
                }
                for path in event.paths {
                    if is_relevant(&path, &filter_roots, &ignore) {
                        let _ = tx.send(path);
                    }
                }
            }
            Err(e) => warn!(error = %e, "File watch error"),
        })
        .map_err(|e| SupervisorError::WatchFailed { path: None, reason: e.to_string() })?;

        for path in paths {
            watcher.watch(path, RecursiveMode::Recursive).map_err(|e| {
                SupervisorError::WatchFailed { path: Some(path.clone()), reason: e.to_string() }
            })?;
            info!(path = %path.display(), "Watching for changes");
        }

        let debounce_task = tokio::spawn(debounce_loop(rx, restart, debounce));

        Ok(Self { _watcher: watcher, debounce_task })
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.debounce_task.abort();
    }
}

/// Waits for a first change, swallows everything that follows within
/// `debounce`, then issues one restart request.
async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    restart: RestartHandle,
    debounce: Duration,
) {
    while let Some(first) = rx.recv().await {
        let mut changed = 1usize;
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(_)) => changed += 1,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        debug!(path = %first.display(), changed, "Source change detected");
        if !restart.request() {
            debug!("Restart already pending, change coalesced");
        }
    }
}

fn is_change(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_))
}

/// Ignore patterns are matched against the path relative to its watch root so
/// that directories above the root never cause a match.
fn is_relevant(path: &Path, roots: &[PathBuf], ignore: &[String]) -> bool {
    let relative = roots.iter().find_map(|root| path.strip_prefix(root).ok()).unwrap_or(path);
    !matches_ignore(relative, ignore)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind};

    #[test]
    fn test_relevant_paths() {
        let roots = vec![PathBuf::from("/work/.hatch/project")];
        let ignore = default_watch_ignore();

        assert!(is_relevant(Path::new("/work/.hatch/project/main.py"), &roots, &ignore));
        assert!(is_relevant(Path::new("/work/.hatch/project/routers/auth.py"), &roots, &ignore));
        assert!(!is_relevant(
            Path::new("/work/.hatch/project/routers/__pycache__/auth.cpython-311.pyc"),
            &roots,
            &ignore
        ));
        assert!(!is_relevant(Path::new("/work/.hatch/project/.main.py.swp"), &roots, &ignore));
        assert!(!is_relevant(Path::new("/work/.hatch/project/main.py~"), &roots, &ignore));
        assert!(!is_relevant(Path::new("/work/.hatch/project/.git/index"), &roots, &ignore));
    }

    #[test]
    fn test_change_kinds() {
        assert!(is_change(&EventKind::Create(CreateKind::File)));
        assert!(is_change(&EventKind::Modify(ModifyKind::Any)));
        assert!(!is_change(&EventKind::Access(AccessKind::Any)));
    }

    #[tokio::test]
    async fn test_debounce_coalesces_burst() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (restart, mut requests) = RestartHandle::channel();
        let task = tokio::spawn(debounce_loop(rx, restart, Duration::from_millis(50)));

        for i in 0..5 {
            tx.send(PathBuf::from(format!("/src/file{}.py", i))).unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), requests.recv()).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(requests.try_recv().is_err(), "burst must produce a single request");

        drop(tx);
        task.await.unwrap();
    }
}
