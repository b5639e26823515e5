//! In-memory reference implementation of the catalog store.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use vellum_model::{ArtifactRef, CatalogEntry};

use crate::error::Result;

use super::{CatalogStore, merge_entries};

#[derive(Default)]
struct StoreState {
    rows: HashMap<PathBuf, CatalogEntry>,
    artifacts: Vec<ArtifactRef>,
    mutations: u64,
}

/// Single-mutex store holding catalog rows and derived-artifact references
/// together, so cascading deletes and moves are atomic by construction: the
/// critical section is the transactional boundary.
///
/// Doubles as the backend for tests and for deployments that rebuild the
/// catalog from a scan at startup; durable backends implement the same
/// trait behind their own transactions.
#[derive(Default)]
pub struct MemoryCatalogStore {
    state: Mutex<StoreState>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a derived reference, standing in for a collaborator store row.
    pub fn insert_artifact(&self, artifact: ArtifactRef) {
        let mut state = self.state.lock().expect("catalog state poisoned");
        state.artifacts.push(artifact);
    }

    /// Derived references currently keyed by `path`.
    pub fn artifacts_for(&self, path: &Path) -> Vec<ArtifactRef> {
        let state = self.state.lock().expect("catalog state poisoned");
        state
            .artifacts
            .iter()
            .filter(|artifact| artifact.path == path)
            .cloned()
            .collect()
    }

    /// Number of mutating operations applied since construction. Lets tests
    /// assert that an idle rescan performs zero catalog mutations.
    pub fn mutation_count(&self) -> u64 {
        self.state.lock().expect("catalog state poisoned").mutations
    }

    pub fn entry_count(&self) -> usize {
        self.state.lock().expect("catalog state poisoned").rows.len()
    }
}

impl fmt::Debug for MemoryCatalogStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().expect("catalog state poisoned");
        f.debug_struct("MemoryCatalogStore")
            .field("rows", &state.rows.len())
            .field("artifacts", &state.artifacts.len())
            .field("mutations", &state.mutations)
            .finish()
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn get(&self, path: &Path) -> Result<Option<CatalogEntry>> {
        let state = self.state.lock().expect("catalog state poisoned");
        Ok(state.rows.get(path).cloned())
    }

    async fn upsert_with_merge(
        &self,
        candidate: CatalogEntry,
    ) -> Result<CatalogEntry> {
        let mut state = self.state.lock().expect("catalog state poisoned");
        let merged = match state.rows.get(&candidate.path) {
            Some(existing) => merge_entries(existing, candidate),
            None => candidate,
        };
        state.rows.insert(merged.path.clone(), merged.clone());
        state.mutations += 1;
        Ok(merged)
    }

    async fn delete_with_cascade(&self, path: &Path) -> Result<bool> {
        let mut state = self.state.lock().expect("catalog state poisoned");
        let existed = state.rows.remove(path).is_some();
        let before = state.artifacts.len();
        state.artifacts.retain(|artifact| artifact.path != path);
        if existed || state.artifacts.len() != before {
            state.mutations += 1;
        }
        Ok(existed)
    }

    async fn move_atomic(
        &self,
        old: &Path,
        new: &Path,
        entry: CatalogEntry,
    ) -> Result<CatalogEntry> {
        let mut state = self.state.lock().expect("catalog state poisoned");
        let merged = match state.rows.get(new) {
            Some(existing) => merge_entries(existing, entry),
            None => entry,
        };
        state.rows.remove(old);
        state.rows.insert(new.to_path_buf(), merged.clone());
        for artifact in &mut state.artifacts {
            if artifact.path == old {
                artifact.path = new.to_path_buf();
            }
        }
        state.mutations += 1;
        Ok(merged)
    }

    async fn list_tracked_paths(&self) -> Result<Vec<PathBuf>> {
        let state = self.state.lock().expect("catalog state poisoned");
        let mut paths: Vec<PathBuf> = state.rows.keys().cloned().collect();
        paths.sort();
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_model::ArtifactKind;

    fn entry(path: &str, hash: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            path: PathBuf::from(path),
            content_hash: hash.map(str::to_string),
            ..CatalogEntry::default()
        }
    }

    #[tokio::test]
    async fn upsert_applies_the_merge_policy() {
        let store = MemoryCatalogStore::new();
        store
            .upsert_with_merge(entry("/vault/doc.md", Some("aa11")))
            .await
            .unwrap();
        store
            .upsert_with_merge(entry("/vault/doc.md", None))
            .await
            .unwrap();

        let row = store.get(Path::new("/vault/doc.md")).await.unwrap().unwrap();
        assert_eq!(row.content_hash.as_deref(), Some("aa11"));
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn delete_cascades_to_artifacts() {
        let store = MemoryCatalogStore::new();
        let path = PathBuf::from("/vault/doc.md");
        store
            .upsert_with_merge(entry("/vault/doc.md", Some("aa11")))
            .await
            .unwrap();
        store.insert_artifact(ArtifactRef::new(path.clone(), ArtifactKind::SearchIndex));
        store.insert_artifact(ArtifactRef::new(path.clone(), ArtifactKind::Pin));

        assert!(store.delete_with_cascade(&path).await.unwrap());
        assert!(store.artifacts_for(&path).is_empty());
        assert!(store.get(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn move_repoints_artifacts_and_clears_the_old_row() {
        let store = MemoryCatalogStore::new();
        let old = PathBuf::from("/vault/inbox/doc.md");
        let new = PathBuf::from("/vault/archive/doc.md");
        let row = store
            .upsert_with_merge(entry("/vault/inbox/doc.md", Some("aa11")))
            .await
            .unwrap();
        store.insert_artifact(ArtifactRef::new(old.clone(), ArtifactKind::SearchIndex));

        store
            .move_atomic(&old, &new, row.clone().at_path(new.clone()))
            .await
            .unwrap();

        assert!(store.get(&old).await.unwrap().is_none());
        let moved = store.get(&new).await.unwrap().unwrap();
        assert_eq!(moved.content_hash.as_deref(), Some("aa11"));
        assert!(store.artifacts_for(&old).is_empty());
        assert_eq!(store.artifacts_for(&new).len(), 1);
    }

    #[tokio::test]
    async fn deleting_an_untracked_path_counts_no_mutation() {
        let store = MemoryCatalogStore::new();
        assert!(!store.delete_with_cascade(Path::new("/vault/ghost.md")).await.unwrap());
        assert_eq!(store.mutation_count(), 0);
    }
}
