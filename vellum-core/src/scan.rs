//! Periodic full-tree scan and catalog reconciliation.
//!
//! The scanner provides eventual consistency independent of live
//! notifications: it is both the safety net for missed watch events and the
//! only mechanism that can observe changes made while the engine was not
//! running. Each pass walks the tree upserting what it finds, then deletes
//! every tracked row whose path was not seen on disk.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::filter::is_excluded;
use crate::pipeline::{ProcessContext, UpsertOutcome};

/// Counters from one scan pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Paths seen on disk (tracked or skipped-as-unchanged).
    pub discovered: usize,
    /// Rows inserted or updated during discovery.
    pub updated: usize,
    /// Orphaned rows removed during reconciliation.
    pub removed: usize,
}

/// Walks the vault on a timer and reconciles the catalog against disk.
pub struct VaultScanner {
    root: PathBuf,
    ctx: Arc<ProcessContext>,
    startup_delay: Duration,
    scan_interval: Duration,
    shutdown: Arc<RwLock<bool>>,
}

impl VaultScanner {
    pub(crate) fn new(
        root: PathBuf,
        ctx: Arc<ProcessContext>,
        startup_delay: Duration,
        scan_interval: Duration,
    ) -> Self {
        Self {
            root,
            ctx,
            startup_delay,
            scan_interval,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the background task: one pass shortly after startup, then one
    /// per interval.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        let scanner = Arc::clone(&self);
        tokio::spawn(async move {
            info!(
                "scanner started: first pass in {:?}, then every {:?}",
                scanner.startup_delay, scanner.scan_interval
            );
            *scanner.shutdown.write().await = false;
            tokio::time::sleep(scanner.startup_delay).await;

            let mut ticker = interval_at(
                Instant::now() + scanner.scan_interval,
                scanner.scan_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                if *scanner.shutdown.read().await {
                    info!("scanner shutting down");
                    break;
                }
                match scanner.run_scan_once().await {
                    Ok(summary) => {
                        info!(
                            discovered = summary.discovered,
                            updated = summary.updated,
                            removed = summary.removed,
                            "scan pass complete"
                        );
                    }
                    Err(err) => warn!("scan pass failed: {err}"),
                }
                ticker.tick().await;
            }
        })
    }

    /// Stop the scanner after the current pass.
    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
    }

    /// One full pass: discovery then reconciliation.
    pub async fn run_scan_once(&self) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let seen = self.discover(&mut summary).await?;
        self.reconcile(&seen, &mut summary).await?;
        Ok(summary)
    }

    /// Phase 1: walk the tree, upsert every non-excluded entry through the
    /// shared path locks, and record what was seen. Unchanged rows are
    /// skipped without a content read.
    async fn discover(
        &self,
        summary: &mut ScanSummary,
    ) -> Result<HashSet<PathBuf>> {
        let mut seen = HashSet::new();
        let mut queue = vec![(self.root.clone(), 0usize)];

        while let Some((dir, depth)) = queue.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if depth == 0 => return Err(err.into()),
                Err(err) => {
                    warn!(
                        path = %dir.display(),
                        "failed to read directory during scan: {err}"
                    );
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        warn!(
                            path = %dir.display(),
                            "failed to read directory entry: {err}"
                        );
                        break;
                    }
                };
                let path = entry.path();
                if is_excluded(&path, depth == 0) {
                    continue;
                }

                seen.insert(path.clone());
                summary.discovered += 1;
                match self.ctx.upsert_path(&path, true).await {
                    Ok(UpsertOutcome::Updated(_)) => summary.updated += 1,
                    Ok(UpsertOutcome::Unchanged) => {}
                    Ok(UpsertOutcome::Missing) => {
                        // Vanished mid-walk; reconciliation sorts it out.
                        seen.remove(&path);
                        summary.discovered -= 1;
                    }
                    Err(err) => {
                        warn!(
                            path = %path.display(),
                            "failed to upsert during scan: {err}"
                        );
                    }
                }

                let is_dir = entry
                    .file_type()
                    .await
                    .map(|t| t.is_dir())
                    .unwrap_or(false);
                if is_dir {
                    queue.push((path, depth + 1));
                }
            }
        }

        Ok(seen)
    }

    /// Phase 2: delete every tracked row whose path was not seen on disk.
    /// Individual failures are logged and left for the next pass — the
    /// orphan will still be absent from the next seen-set.
    async fn reconcile(
        &self,
        seen: &HashSet<PathBuf>,
        summary: &mut ScanSummary,
    ) -> Result<()> {
        let tracked = self.ctx.store.list_tracked_paths().await?;
        for path in tracked {
            if seen.contains(&path) || !path.starts_with(&self.root) {
                continue;
            }
            // The row may have been created after the walk passed its
            // directory; disk is the ground truth, not the seen-set.
            match self.ctx.processor.stat(&path).await {
                Ok(None) => {}
                Ok(Some(_)) => continue,
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        "failed to stat during reconciliation: {err}"
                    );
                    continue;
                }
            }
            debug!(path = %path.display(), "reconciling orphaned row");
            match self.ctx.apply_delete(&path).await {
                Ok(true) => summary.removed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        "failed to reconcile orphan, retrying next pass: {err}"
                    );
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for VaultScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultScanner")
            .field("root", &self.root)
            .field("scan_interval", &self.scan_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogStore, MemoryCatalogStore};
    use crate::locks::PathLocks;
    use crate::metadata::MetadataProcessor;
    use crate::pipeline::NoopChangeObserver;
    use std::path::Path;
    use tempfile::tempdir;
    use vellum_model::CatalogEntry;

    fn scanner_fixture(
        root: &Path,
        store: Arc<MemoryCatalogStore>,
    ) -> VaultScanner {
        let ctx = Arc::new(ProcessContext {
            locks: Arc::new(PathLocks::new()),
            store,
            processor: MetadataProcessor::new(256),
            observer: Arc::new(NoopChangeObserver),
        });
        VaultScanner::new(
            root.to_path_buf(),
            ctx,
            Duration::ZERO,
            Duration::from_secs(3_600),
        )
    }

    #[tokio::test]
    async fn discovery_tracks_files_and_containers() {
        let tmp = tempdir().unwrap();
        tokio::fs::create_dir(tmp.path().join("inbox")).await.unwrap();
        tokio::fs::write(tmp.path().join("inbox/doc.md"), "hello")
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("top.md"), "top").await.unwrap();
        // Excluded branches are pruned entirely.
        tokio::fs::create_dir(tmp.path().join(".git")).await.unwrap();
        tokio::fs::write(tmp.path().join(".git/config"), "x")
            .await
            .unwrap();

        let store = Arc::new(MemoryCatalogStore::new());
        let scanner = scanner_fixture(tmp.path(), Arc::clone(&store));
        let summary = scanner.run_scan_once().await.unwrap();

        assert_eq!(summary.discovered, 3);
        assert_eq!(summary.updated, 3);
        assert_eq!(summary.removed, 0);
        assert!(
            store
                .get(&tmp.path().join("inbox/doc.md"))
                .await
                .unwrap()
                .is_some()
        );
        assert!(store.get(&tmp.path().join(".git/config")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconciliation_removes_orphans_and_preserves_valid_rows() {
        let tmp = tempdir().unwrap();
        tokio::fs::write(tmp.path().join("b.md"), "keep").await.unwrap();

        let store = Arc::new(MemoryCatalogStore::new());
        let scanner = scanner_fixture(tmp.path(), Arc::clone(&store));
        scanner.run_scan_once().await.unwrap();
        let kept = store.get(&tmp.path().join("b.md")).await.unwrap().unwrap();

        // Seed an orphan as if `a.md` had existed before the engine stopped.
        store
            .upsert_with_merge(CatalogEntry {
                path: tmp.path().join("a.md"),
                content_hash: Some("deadbeef".into()),
                ..CatalogEntry::default()
            })
            .await
            .unwrap();

        let summary = scanner.run_scan_once().await.unwrap();
        assert_eq!(summary.removed, 1);
        assert!(store.get(&tmp.path().join("a.md")).await.unwrap().is_none());

        // The surviving row is untouched, including its hash.
        let after = store.get(&tmp.path().join("b.md")).await.unwrap().unwrap();
        assert_eq!(after.content_hash, kept.content_hash);
        assert_eq!(after.last_observed_at, kept.last_observed_at);
    }

    #[tokio::test]
    async fn second_pass_with_no_changes_mutates_nothing() {
        let tmp = tempdir().unwrap();
        tokio::fs::create_dir(tmp.path().join("notes")).await.unwrap();
        tokio::fs::write(tmp.path().join("notes/a.md"), "alpha")
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("notes/b.md"), "beta")
            .await
            .unwrap();

        let store = Arc::new(MemoryCatalogStore::new());
        let scanner = scanner_fixture(tmp.path(), Arc::clone(&store));
        scanner.run_scan_once().await.unwrap();

        let mutations_after_first = store.mutation_count();
        let summary = scanner.run_scan_once().await.unwrap();
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.removed, 0);
        assert_eq!(store.mutation_count(), mutations_after_first);
    }

    #[tokio::test]
    async fn offline_changes_reconcile_on_the_first_pass() {
        let tmp = tempdir().unwrap();
        tokio::fs::create_dir(tmp.path().join("inbox")).await.unwrap();
        tokio::fs::write(tmp.path().join("inbox/doc.md"), "original")
            .await
            .unwrap();

        let store = Arc::new(MemoryCatalogStore::new());
        let scanner = scanner_fixture(tmp.path(), Arc::clone(&store));
        scanner.run_scan_once().await.unwrap();

        // "Engine stopped": doc.md is deleted and other.md created directly
        // on disk, with no notifications delivered.
        tokio::fs::remove_file(tmp.path().join("inbox/doc.md"))
            .await
            .unwrap();
        tokio::fs::write(tmp.path().join("inbox/other.md"), "new arrival")
            .await
            .unwrap();

        scanner.run_scan_once().await.unwrap();

        assert!(
            store
                .get(&tmp.path().join("inbox/doc.md"))
                .await
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .get(&tmp.path().join("inbox/other.md"))
                .await
                .unwrap()
                .is_some()
        );
        let tracked = store.list_tracked_paths().await.unwrap();
        assert_eq!(
            tracked,
            vec![tmp.path().join("inbox"), tmp.path().join("inbox/other.md")]
        );
    }
}
