//! Per-path mutual exclusion shared by every catalog write path.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Handle released when a path's read-compute-write sequence finishes.
pub type PathGuard = OwnedMutexGuard<()>;

/// Path-keyed lock table owned by the service instance.
///
/// Every caller that reads current disk state and writes a catalog row for a
/// path (API handler, watcher-triggered processing, scanner) must hold the
/// path's lock across the full stat-hash-upsert sequence, not just the
/// upsert. Whoever acquires second necessarily re-reads disk state at least
/// as fresh as the first caller's, which combined with the store merge
/// policy yields "freshest completed write wins".
pub struct PathLocks {
    inner: Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for one path, blocking until any holder releases.
    pub async fn acquire(&self, path: &Path) -> PathGuard {
        let slot = self.slot(path);
        slot.lock_owned().await
    }

    /// Acquire locks for both endpoints of a move.
    ///
    /// Acquisition order is lexicographic on the two paths, so two
    /// concurrent moves referencing each other's endpoints in opposite
    /// order cannot deadlock. The returned guards are in `(old, new)`
    /// argument order regardless of which was locked first. The endpoints
    /// must be distinct.
    pub async fn acquire_pair(
        &self,
        old: &Path,
        new: &Path,
    ) -> (PathGuard, PathGuard) {
        debug_assert_ne!(old, new, "move endpoints must be distinct paths");
        if old < new {
            let first = self.acquire(old).await;
            let second = self.acquire(new).await;
            (first, second)
        } else {
            let second = self.acquire(new).await;
            let first = self.acquire(old).await;
            (first, second)
        }
    }

    fn slot(&self, path: &Path) -> Arc<AsyncMutex<()>> {
        let mut table = self.inner.lock().expect("path lock table poisoned");
        // Drop entries nobody holds so the table stays bounded by the number
        // of in-flight paths rather than every path ever touched.
        table.retain(|_, slot| Arc::strong_count(slot) > 1);
        Arc::clone(
            table
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    #[cfg(test)]
    fn table_len(&self) -> usize {
        self.inner.lock().expect("path lock table poisoned").len()
    }
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PathLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let len = self.inner.lock().map(|table| table.len()).unwrap_or(0);
        f.debug_struct("PathLocks").field("tracked", &len).finish()
    }
}
