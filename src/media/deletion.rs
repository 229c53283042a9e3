//! Timed removal of composed videos.

use crate::server::metrics;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct PendingDeletion {
    id: u64,
    token: CancellationToken,
}

struct Inner {
    token: CancellationToken,
    pending: Mutex<HashMap<PathBuf, PendingDeletion>>,
    next_id: AtomicU64,
}

impl Inner {
    /// Removes the entry for `path` if it still belongs to deletion `id`.
    fn forget(&self, path: &Path, id: u64) {
        let mut pending = self.pending.lock().unwrap();
        if pending.get(path).map(|p| p.id) == Some(id) {
            pending.remove(path);
        }
        metrics::set_pending_deletions(pending.len());
    }
}

/// Deletes files after a delay, one timer task per file.
///
/// Scheduling a path again replaces its previous timer. On shutdown, or
/// when the parent token is cancelled, every pending file is deleted right
/// away.
#[derive(Clone)]
pub struct DeletionScheduler {
    inner: Arc<Inner>,
}

/// A pending deletion.
pub struct ScheduledDeletion {
    path: PathBuf,
    token: CancellationToken,
    handle: JoinHandle<bool>,
}

impl ScheduledDeletion {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keeps the file.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Waits for the timer task. True if this deletion removed the file.
    pub async fn wait(self) -> bool {
        self.handle.await.unwrap_or(false)
    }
}

impl DeletionScheduler {
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                token: parent.child_token(),
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().unwrap().len()
    }

    pub fn is_pending(&self, path: &Path) -> bool {
        self.inner.pending.lock().unwrap().contains_key(path)
    }

    pub fn schedule(&self, path: PathBuf, delay: Duration) -> ScheduledDeletion {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let token = self.inner.token.child_token();

        if self.inner.token.is_cancelled() {
            // Shut down already, nothing would run the timer.
            let deleted = delete_file(&path);
            return ScheduledDeletion {
                path,
                token,
                handle: tokio::spawn(async move { deleted }),
            };
        }

        {
            let mut pending = self.inner.pending.lock().unwrap();
            let previous = pending.insert(
                path.clone(),
                PendingDeletion {
                    id,
                    token: token.clone(),
                },
            );
            if let Some(previous) = previous {
                debug!("Rescheduling deletion of {:?}", path);
                previous.token.cancel();
            }
            metrics::set_pending_deletions(pending.len());
        }

        let inner = Arc::clone(&self.inner);
        let task_token = token.clone();
        let task_path = path.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    inner.forget(&task_path, id);
                    delete_file(&task_path)
                }
                _ = task_token.cancelled() => {
                    inner.forget(&task_path, id);
                    // the whole scheduler stopping still removes the file
                    inner.token.is_cancelled() && delete_file(&task_path)
                }
            }
        });

        ScheduledDeletion {
            path,
            token,
            handle,
        }
    }

    /// Stops every timer and deletes the files they guarded.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<(PathBuf, PendingDeletion)> = {
            let mut pending = self.inner.pending.lock().unwrap();
            let drained = pending.drain().collect();
            metrics::set_pending_deletions(0);
            drained
        };
        self.inner.token.cancel();

        let mut deleted = 0;
        for (path, _) in drained {
            if delete_file(&path) {
                deleted += 1;
            }
        }
        info!("Deletion scheduler stopped, removed {} pending files", deleted);
        deleted
    }
}

fn delete_file(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Deleted {:?}", path);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            warn!("Failed to delete {:?}: {}", path, e);
            false
        }
    }
}
