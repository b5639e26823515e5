//! Catalog persistence abstraction and merge policy.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use vellum_model::CatalogEntry;

use crate::error::Result;

pub mod memory;
pub use memory::MemoryCatalogStore;

/// Abstract persistence for catalog rows and their derived references.
///
/// This is the single point enforcing data-freshness invariants regardless
/// of which caller is writing. Backends must make `delete_with_cascade` and
/// `move_atomic` atomic units: a crash mid-operation must not leave the
/// catalog split between two paths or referencing neither.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Current row for a path, if tracked.
    async fn get(&self, path: &Path) -> Result<Option<CatalogEntry>>;

    /// Insert the candidate, or merge it field-by-field into the existing
    /// row per [`merge_entries`]: a non-empty `content_hash` is never
    /// blanked by a candidate that did not compute one.
    async fn upsert_with_merge(
        &self,
        candidate: CatalogEntry,
    ) -> Result<CatalogEntry>;

    /// Remove the row and, in the same atomic unit, every derived-artifact
    /// reference keyed by the path. Returns whether a row existed.
    async fn delete_with_cascade(&self, path: &Path) -> Result<bool>;

    /// Upsert `entry` at `new`, delete the row at `old`, and repoint every
    /// derived-artifact reference from `old` to `new`, atomically.
    async fn move_atomic(
        &self,
        old: &Path,
        new: &Path,
        entry: CatalogEntry,
    ) -> Result<CatalogEntry>;

    /// Every path currently tracked. Reconciliation diffs this against the
    /// scanner's seen-set.
    async fn list_tracked_paths(&self) -> Result<Vec<PathBuf>>;
}

/// Field-by-field merge of a candidate row into an existing one.
///
/// Row identity and `created_at` survive from the existing row. A candidate
/// missing a content hash preserves the existing hash and preview: the
/// candidate's read either predates the recorded one (a slow scan losing to
/// a faster write under path-lock serialization) or never touched content
/// at all, so by definition it carries nothing fresher.
pub fn merge_entries(
    existing: &CatalogEntry,
    mut candidate: CatalogEntry,
) -> CatalogEntry {
    candidate.id = existing.id;
    candidate.created_at = existing.created_at;
    if candidate.content_hash.is_none() {
        candidate.content_hash = existing.content_hash.clone();
        candidate.preview = existing.preview.clone();
    }
    candidate
}
