//! Computes catalog attributes from the file currently on disk.

use std::io;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use vellum_model::CatalogEntry;

use crate::error::Result;

/// Cheap stat snapshot used to decide whether a full content read is
/// warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsStat {
    pub is_dir: bool,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Builds `CatalogEntry` rows from ground-truth disk state.
///
/// Every produced hash reflects a real read of current content at the time
/// of the call; callers hold the path lock so the read-compute-write
/// sequence is not interleaved with another writer on the same path.
#[derive(Debug, Clone)]
pub struct MetadataProcessor {
    preview_max_bytes: usize,
}

impl MetadataProcessor {
    pub fn new(preview_max_bytes: usize) -> Self {
        Self { preview_max_bytes }
    }

    /// Stat `path` without touching content. `Ok(None)` when it vanished.
    pub async fn stat(&self, path: &Path) -> Result<Option<FsStat>> {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let modified_at = meta
            .modified()
            .ok()
            .map(system_time_to_utc)
            .unwrap_or_else(Utc::now);
        Ok(Some(FsStat {
            is_dir: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            modified_at,
            created_at: meta
                .created()
                .ok()
                .map(system_time_to_utc)
                .unwrap_or(modified_at),
        }))
    }

    /// Stat and read `path`, producing a fresh entry.
    ///
    /// Returns `Ok(None)` when the path no longer exists: notifications lag
    /// the filesystem, so a vanished path is an expected no-op rather than
    /// an error.
    pub async fn process(&self, path: &Path) -> Result<Option<CatalogEntry>> {
        let Some(stat) = self.stat(path).await? else {
            return Ok(None);
        };

        if stat.is_dir {
            return Ok(Some(CatalogEntry {
                id: Uuid::now_v7(),
                path: path.to_path_buf(),
                is_container: true,
                size: 0,
                content_hash: None,
                preview: None,
                modified_at: stat.modified_at,
                created_at: stat.created_at,
                last_observed_at: Utc::now(),
            }));
        }

        let content = match tokio::fs::read(path).await {
            Ok(content) => content,
            // The file can vanish between the stat and the read.
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        let content_hash = hex::encode(Sha256::digest(&content));
        let preview = self.extract_preview(&content);

        Ok(Some(CatalogEntry {
            id: Uuid::now_v7(),
            path: path.to_path_buf(),
            is_container: false,
            size: content.len() as u64,
            content_hash: Some(content_hash),
            preview,
            modified_at: stat.modified_at,
            created_at: stat.created_at,
            last_observed_at: Utc::now(),
        }))
    }

    /// First `preview_max_bytes` of the content when it is valid UTF-8,
    /// truncated back to a character boundary. Binary files get none.
    fn extract_preview(&self, content: &[u8]) -> Option<String> {
        let window = &content[..content.len().min(self.preview_max_bytes)];
        match std::str::from_utf8(window) {
            Ok(text) => Some(text.to_string()),
            Err(err) if err.valid_up_to() > 0 => {
                let clean = &window[..err.valid_up_to()];
                // Only a boundary truncation is acceptable; an error with
                // remaining invalid bytes inside the window means binary.
                if err.error_len().is_none() {
                    std::str::from_utf8(clean).ok().map(str::to_string)
                } else {
                    None
                }
            }
            Err(_) => None,
        }
    }
}

fn system_time_to_utc(time: SystemTime) -> DateTime<Utc> {
    match time.duration_since(std::time::UNIX_EPOCH) {
        Ok(dur) => {
            DateTime::<Utc>::from_timestamp(dur.as_secs() as i64, dur.subsec_nanos())
                .unwrap_or_else(Utc::now)
        }
        Err(_) => Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn hashes_and_previews_a_text_file() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("doc.md");
        tokio::fs::write(&path, "# Title\n\nbody text")
            .await
            .unwrap();

        let processor = MetadataProcessor::new(512);
        let entry = processor.process(&path).await.unwrap().unwrap();

        assert!(!entry.is_container);
        assert_eq!(entry.size, 18);
        assert_eq!(
            entry.content_hash.as_deref(),
            Some(hex::encode(Sha256::digest(b"# Title\n\nbody text")).as_str())
        );
        assert_eq!(entry.preview.as_deref(), Some("# Title\n\nbody text"));
    }

    #[tokio::test]
    async fn directories_become_containers_without_hashes() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("inbox");
        tokio::fs::create_dir(&dir).await.unwrap();

        let processor = MetadataProcessor::new(512);
        let entry = processor.process(&dir).await.unwrap().unwrap();

        assert!(entry.is_container);
        assert!(entry.content_hash.is_none());
        assert!(entry.preview.is_none());
    }

    #[tokio::test]
    async fn vanished_paths_are_a_no_op() {
        let tmp = tempdir().unwrap();
        let processor = MetadataProcessor::new(512);
        let entry = processor
            .process(&tmp.path().join("never-existed.md"))
            .await
            .unwrap();
        assert!(entry.is_none());
    }

    #[tokio::test]
    async fn preview_truncates_on_a_character_boundary() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("accents.md");
        // Multi-byte character straddling the preview limit.
        tokio::fs::write(&path, "abcé").await.unwrap();

        let processor = MetadataProcessor::new(4);
        let entry = processor.process(&path).await.unwrap().unwrap();
        assert_eq!(entry.preview.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn binary_content_gets_no_preview() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("blob.bin");
        tokio::fs::write(&path, [0u8, 159, 146, 150, 0, 1])
            .await
            .unwrap();

        let processor = MetadataProcessor::new(512);
        let entry = processor.process(&path).await.unwrap().unwrap();
        assert!(entry.preview.is_none());
        assert!(entry.content_hash.is_some());
    }
}
