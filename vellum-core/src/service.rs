//! Service facade owning the watcher, the scanner, and the synchronous API.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use vellum_model::CatalogEntry;

use crate::catalog::CatalogStore;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::filter::excluded_within;
use crate::locks::PathLocks;
use crate::metadata::MetadataProcessor;
use crate::pipeline::{ChangeObserver, ProcessContext, UpsertOutcome};
use crate::scan::{ScanSummary, VaultScanner};
use crate::watch::{WatchPipeline, WatchTasks, spawn_watch};

struct RunningTasks {
    watch: WatchTasks,
    scan_task: JoinHandle<()>,
}

/// Keeps the catalog consistent with one vault root.
///
/// Three write paths converge here: the synchronous API below, live watch
/// notifications, and the periodic scan. All of them run through the same
/// path locks and the same store merge policy, so the freshest completed
/// write wins regardless of which trigger observed it last.
pub struct SyncService {
    root: PathBuf,
    config: SyncConfig,
    ctx: Arc<ProcessContext>,
    scanner: Arc<VaultScanner>,
    running: Mutex<Option<RunningTasks>>,
}

impl SyncService {
    /// Build a service for `root`, which must be an existing directory.
    pub fn new(
        root: impl Into<PathBuf>,
        config: SyncConfig,
        store: Arc<dyn CatalogStore>,
        observer: Arc<dyn ChangeObserver>,
    ) -> Result<Self> {
        let root = root.into();
        let root = std::fs::canonicalize(&root).map_err(|err| {
            SyncError::InvalidPath(format!(
                "vault root {}: {err}",
                root.display()
            ))
        })?;
        if !root.is_dir() {
            return Err(SyncError::InvalidPath(format!(
                "vault root {} is not a directory",
                root.display()
            )));
        }

        let ctx = Arc::new(ProcessContext {
            locks: Arc::new(PathLocks::new()),
            store,
            processor: MetadataProcessor::new(config.preview_max_bytes),
            observer,
        });
        let scanner = Arc::new(VaultScanner::new(
            root.clone(),
            Arc::clone(&ctx),
            config.startup_scan_delay(),
            config.scan_interval(),
        ));

        Ok(Self {
            root,
            config,
            ctx,
            scanner,
            running: Mutex::new(None),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Begin watching and scanning. Idempotent while running.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let (pipeline, effective_rx) = WatchPipeline::new(
            self.root.clone(),
            Arc::clone(&self.ctx),
            self.config.debounce_window(),
            self.config.move_window(),
        );
        let watch = spawn_watch(
            pipeline,
            effective_rx,
            self.config.event_channel_capacity,
        )
        .await?;
        let scan_task = Arc::clone(&self.scanner).start();

        *running = Some(RunningTasks { watch, scan_task });
        info!(root = %self.root.display(), "sync service started");
        Ok(())
    }

    /// Stop background activity: cancel pending debounce timers, stop the
    /// watcher, and halt the scan loop. In-flight work drains; nothing new
    /// is admitted.
    pub async fn stop(&self) {
        let Some(tasks) = self.running.lock().await.take() else {
            return;
        };
        tasks.watch.shutdown();
        self.scanner.stop().await;
        tasks.scan_task.abort();
        info!(root = %self.root.display(), "sync service stopped");
    }

    /// Run one discovery-plus-reconciliation pass immediately, outside the
    /// periodic schedule.
    pub async fn run_scan_once(&self) -> Result<ScanSummary> {
        self.scanner.run_scan_once().await
    }

    /// Write `content` to `path` and upsert the resulting entry, holding
    /// the path lock across the disk write and the catalog write. Bypasses
    /// debouncing entirely.
    pub async fn write_file(
        &self,
        path: impl AsRef<Path>,
        content: &[u8],
    ) -> Result<CatalogEntry> {
        let path = self.resolve(path.as_ref())?;
        if let Some(parent) = path.parent()
            && parent.starts_with(&self.root)
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let _guard = self.ctx.locks.acquire(&path).await;
        tokio::fs::write(&path, content).await?;
        match self.ctx.upsert_locked(&path, false).await? {
            UpsertOutcome::Updated(entry) => Ok(entry),
            // The write succeeded moments ago; only a concurrent external
            // delete can land here.
            _ => Err(SyncError::Internal(format!(
                "written file {} vanished before it could be cataloged",
                path.display()
            ))),
        }
    }

    /// Delete `path` from disk and drop its catalog row, cascading to
    /// derived references. Deleting a directory also drops every tracked
    /// row underneath it.
    pub async fn delete_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = self.resolve(path.as_ref())?;

        let was_dir = {
            let _guard = self.ctx.locks.acquire(&path).await;
            let stat = self.ctx.processor.stat(&path).await?;
            let row_existed = match stat {
                Some(stat) if stat.is_dir => {
                    tokio::fs::remove_dir_all(&path).await?;
                    self.ctx.delete_locked(&path).await?
                }
                Some(_) => {
                    tokio::fs::remove_file(&path).await?;
                    self.ctx.delete_locked(&path).await?
                }
                None => self.ctx.delete_locked(&path).await?,
            };
            if stat.is_none() && !row_existed {
                return Err(SyncError::NotFound(format!(
                    "{} is neither on disk nor tracked",
                    path.display()
                )));
            }
            stat.map(|s| s.is_dir).unwrap_or(false)
        };

        if was_dir {
            self.drop_tracked_subtree(&path).await?;
        }
        Ok(())
    }

    /// Move `old` to `new` on disk and in the catalog, atomically from the
    /// catalog's point of view. Falls back to copy-then-delete when the
    /// rename crosses filesystems.
    pub async fn move_file(
        &self,
        old: impl AsRef<Path>,
        new: impl AsRef<Path>,
    ) -> Result<CatalogEntry> {
        let old = self.resolve(old.as_ref())?;
        let new = self.resolve(new.as_ref())?;
        if old == new {
            return Err(SyncError::InvalidPath(
                "move endpoints must differ".to_string(),
            ));
        }

        if let Some(parent) = new.parent()
            && parent.starts_with(&self.root)
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let _guards = self.ctx.locks.acquire_pair(&old, &new).await;
        if self.ctx.processor.stat(&old).await?.is_none() {
            return Err(SyncError::NotFound(format!(
                "{} does not exist",
                old.display()
            )));
        }

        rename_with_fallback(&old, &new).await?;
        match self.ctx.record_move_locked(&old, &new).await? {
            Some(entry) => Ok(entry),
            _ => Err(SyncError::Internal(format!(
                "moved file {} vanished before it could be cataloged",
                new.display()
            ))),
        }
    }

    /// Validate a caller-supplied path and anchor it under the vault root.
    ///
    /// Relative paths are joined to the root; absolute paths must already
    /// be inside it. Escapes and excluded targets are validation errors,
    /// not consistency errors.
    fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };

        let rel = joined.strip_prefix(&self.root).map_err(|_| {
            SyncError::InvalidPath(format!(
                "{} escapes the vault root",
                path.display()
            ))
        })?;

        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(seg) => clean.push(seg),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !clean.pop() {
                        return Err(SyncError::InvalidPath(format!(
                            "{} escapes the vault root",
                            path.display()
                        )));
                    }
                }
                _ => {
                    return Err(SyncError::InvalidPath(format!(
                        "{} contains an unsupported component",
                        path.display()
                    )));
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return Err(SyncError::InvalidPath(
                "the vault root itself cannot be a target".to_string(),
            ));
        }

        let resolved = self.root.join(clean);
        if excluded_within(&self.root, &resolved) {
            return Err(SyncError::InvalidPath(format!(
                "{} is reserved or excluded from tracking",
                path.display()
            )));
        }
        Ok(resolved)
    }

    /// Drop rows for everything tracked under a deleted directory.
    async fn drop_tracked_subtree(&self, dir: &Path) -> Result<()> {
        let tracked = self.ctx.store.list_tracked_paths().await?;
        for path in tracked {
            if !path.starts_with(dir) || path == dir {
                continue;
            }
            if let Err(err) = self.ctx.apply_delete(&path).await {
                warn!(
                    path = %path.display(),
                    "failed to drop row under deleted directory: {err}"
                );
            }
        }
        Ok(())
    }
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}

/// Rename, falling back to copy-then-delete for cross-filesystem moves.
/// A partial destination left by a failed copy is removed before the error
/// propagates.
async fn rename_with_fallback(old: &Path, new: &Path) -> Result<()> {
    match tokio::fs::rename(old, new).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            warn!(
                old = %old.display(),
                new = %new.display(),
                "rename failed ({rename_err}); falling back to copy"
            );
            match copy_recursive(old, new).await {
                Ok(()) => {
                    remove_any(old).await?;
                    Ok(())
                }
                Err(copy_err) => {
                    if let Err(cleanup_err) = remove_any(new).await {
                        warn!(
                            path = %new.display(),
                            "failed to remove partial copy: {cleanup_err}"
                        );
                    }
                    Err(copy_err)
                }
            }
        }
    }
}

async fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    let meta = tokio::fs::metadata(src).await?;
    if !meta.is_dir() {
        tokio::fs::copy(src, dst).await?;
        return Ok(());
    }

    let mut queue = vec![(src.to_path_buf(), dst.to_path_buf())];
    while let Some((from, to)) = queue.pop() {
        tokio::fs::create_dir_all(&to).await?;
        let mut entries = tokio::fs::read_dir(&from).await?;
        while let Some(entry) = entries.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                queue.push((entry.path(), target));
            } else {
                tokio::fs::copy(entry.path(), target).await?;
            }
        }
    }
    Ok(())
}

async fn remove_any(path: &Path) -> Result<()> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            tokio::fs::remove_dir_all(path).await?;
        }
        Ok(_) => {
            tokio::fs::remove_file(path).await?;
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
