use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per tracked filesystem object.
///
/// `path` is the identity key while the object exists. The row is owned
/// exclusively by the synchronization engine: created and updated by the API,
/// watcher, and scanner write paths, deleted by delete/move operations or by
/// reconciliation.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: Uuid,
    pub path: PathBuf,
    /// Folder flag. Containers carry no content hash or preview.
    pub is_container: bool,
    pub size: u64,
    /// SHA-256 of the file content, hex encoded. `None` until computed.
    /// Monotonic in freshness: once present it is only ever replaced by
    /// another hash from a real read of current content, never blanked.
    pub content_hash: Option<String>,
    /// Short UTF-8 excerpt of text content, computed alongside the hash.
    pub preview: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}

impl Default for CatalogEntry {
    fn default() -> Self {
        Self {
            id: Uuid::now_v7(),
            path: PathBuf::new(),
            is_container: false,
            size: 0,
            content_hash: None,
            preview: None,
            modified_at: Utc::now(),
            created_at: Utc::now(),
            last_observed_at: Utc::now(),
        }
    }
}

impl CatalogEntry {
    /// Rekey the entry to a new path, keeping content fields intact.
    /// A rename does not change content, so the hash travels with the row.
    pub fn at_path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }
}

impl fmt::Debug for CatalogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogEntry")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("is_container", &self.is_container)
            .field("size", &self.size)
            .field("has_hash", &self.content_hash.is_some())
            .field("has_preview", &self.preview.is_some())
            .field("modified_at", &self.modified_at)
            .field("last_observed_at", &self.last_observed_at)
            .finish()
    }
}
