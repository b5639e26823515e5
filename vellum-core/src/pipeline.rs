//! Shared per-path processing: the read-compute-write core every trigger
//! funnels through.
//!
//! The watcher, the scanner, and the synchronous API all end up here, under
//! the same path locks and against the same store merge policy, so no pair
//! of triggers can race on one path and leave stale data behind.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use vellum_model::{CatalogEntry, ChangeEvent, ChangeKind};

use crate::catalog::CatalogStore;
use crate::error::Result;
use crate::locks::PathLocks;
use crate::metadata::MetadataProcessor;

/// Downstream-processing trigger, invoked once per effective change.
///
/// Delivery is at-least-once per distinct change; implementations must
/// tolerate redundant notifications for the same unchanged state.
pub trait ChangeObserver: Send + Sync {
    fn on_file_change(&self, event: &ChangeEvent);
}

/// No-op observer used when no downstream pipeline is wired up.
#[derive(Debug)]
pub struct NoopChangeObserver;

impl ChangeObserver for NoopChangeObserver {
    fn on_file_change(&self, _event: &ChangeEvent) {}
}

/// Outcome of processing one path against the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum UpsertOutcome {
    /// The path no longer exists on disk; nothing was written.
    Missing,
    /// The tracked row already reflects current disk state; nothing was
    /// written.
    Unchanged,
    /// The row was inserted or updated.
    Updated(CatalogEntry),
}

/// Bundles the lock table, store, metadata processor, and observer shared
/// by every write path. Owned by the service instance.
pub(crate) struct ProcessContext {
    pub locks: Arc<PathLocks>,
    pub store: Arc<dyn CatalogStore>,
    pub processor: MetadataProcessor,
    pub observer: Arc<dyn ChangeObserver>,
}

impl ProcessContext {
    /// Re-read `path` from disk and upsert it, holding the path lock across
    /// the whole stat-hash-upsert sequence.
    ///
    /// With `skip_unchanged`, a row whose size and modification time already
    /// match disk is left untouched; an idle rescan then performs zero
    /// catalog mutations.
    pub async fn upsert_path(
        &self,
        path: &Path,
        skip_unchanged: bool,
    ) -> Result<UpsertOutcome> {
        let _guard = self.locks.acquire(path).await;
        self.upsert_locked(path, skip_unchanged).await
    }

    /// Same as [`Self::upsert_path`] for callers already holding the lock.
    pub async fn upsert_locked(
        &self,
        path: &Path,
        skip_unchanged: bool,
    ) -> Result<UpsertOutcome> {
        let existing = self.store.get(path).await?;

        // Stat before reading: an unchanged row must not cost a content
        // read, let alone a rehash.
        let Some(stat) = self.processor.stat(path).await? else {
            debug!(path = %path.display(), "path vanished before processing");
            return Ok(UpsertOutcome::Missing);
        };

        if skip_unchanged
            && let Some(existing) = &existing
            && existing.is_container == stat.is_dir
            && existing.size == stat.size
            && existing.modified_at == stat.modified_at
        {
            return Ok(UpsertOutcome::Unchanged);
        }

        let Some(fresh) = self.processor.process(path).await? else {
            debug!(path = %path.display(), "path vanished before processing");
            return Ok(UpsertOutcome::Missing);
        };

        let is_new = existing.is_none();
        let content_changed = match &existing {
            Some(existing) => existing.content_hash != fresh.content_hash,
            None => true,
        };

        let stored = self.store.upsert_with_merge(fresh).await?;
        self.observer.on_file_change(&ChangeEvent {
            path: path.to_path_buf(),
            kind: if is_new {
                ChangeKind::Created
            } else {
                ChangeKind::Modified
            },
            is_new,
            content_changed,
            observed_at: Utc::now(),
        });
        Ok(UpsertOutcome::Updated(stored))
    }

    /// Record a move that already happened on disk: lock both endpoints in
    /// deterministic order, then rewrite the catalog atomically.
    pub async fn apply_move(&self, old: &Path, new: &Path) -> Result<()> {
        let _guards = self.locks.acquire_pair(old, new).await;
        self.record_move_locked(old, new).await.map(|_| ())
    }

    /// Catalog half of a move, for callers already holding both locks.
    ///
    /// The new path is re-stat'ed rather than trusted: if it vanished again
    /// the move is a no-op and reconciliation will settle the rest.
    pub async fn record_move_locked(
        &self,
        old: &Path,
        new: &Path,
    ) -> Result<Option<CatalogEntry>> {
        let Some(fresh) = self.processor.process(new).await? else {
            debug!(
                old = %old.display(),
                new = %new.display(),
                "move target vanished before processing"
            );
            return Ok(None);
        };

        // Content travels with the row: identity and creation time survive
        // from the old path's entry when one is tracked.
        let entry = match self.store.get(old).await? {
            Some(prior) => CatalogEntry {
                id: prior.id,
                created_at: prior.created_at,
                ..fresh
            },
            None => fresh,
        };

        let stored = self.store.move_atomic(old, new, entry).await?;
        self.observer.on_file_change(&ChangeEvent {
            path: new.to_path_buf(),
            kind: ChangeKind::Moved {
                from: old.to_path_buf(),
            },
            is_new: false,
            content_changed: false,
            observed_at: Utc::now(),
        });
        Ok(Some(stored))
    }

    /// Drop a path's row and cascade to derived references, under the path
    /// lock.
    pub async fn apply_delete(&self, path: &Path) -> Result<bool> {
        let _guard = self.locks.acquire(path).await;
        self.delete_locked(path).await
    }

    /// Same as [`Self::apply_delete`] for callers already holding the lock.
    pub async fn delete_locked(&self, path: &Path) -> Result<bool> {
        let existed = self.store.delete_with_cascade(path).await?;
        if existed {
            self.observer.on_file_change(&ChangeEvent {
                path: path.to_path_buf(),
                kind: ChangeKind::Removed,
                is_new: false,
                content_changed: true,
                observed_at: Utc::now(),
            });
        }
        Ok(existed)
    }
}

impl fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessContext")
            .field("locks", &self.locks)
            .field("processor", &self.processor)
            .finish()
    }
}
