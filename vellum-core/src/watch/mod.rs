//! Live filesystem watch pipeline.
//!
//! A thin bridge around `notify` that translates platform event kinds into
//! the closed [`FsEventKind`] variant once, at the boundary, then drives the
//! debouncer, the move detector, and per-path processing. Notifications lag
//! the filesystem, so every effective event re-stats its path before acting;
//! a path that vanished in the meantime is a no-op, not an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{EventKind, ModifyKind, RenameMode};
use notify::{
    Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, warn};

use vellum_model::FsEventKind;

use crate::error::{Result, SyncError};
use crate::filter::excluded_within;
use crate::pipeline::ProcessContext;

pub mod debounce;
pub mod moves;

pub use debounce::{DebouncedEvent, Debouncer, NotifyKind};
pub use moves::{DeletionTicket, MoveDetector};

enum WatchMessage {
    Event(Event),
    Error(String),
}

/// Translate one raw notification into per-path classified events.
///
/// Platform specifics are resolved here and nowhere else. A rename with
/// both endpoints becomes `RenamedFrom` on the new path; a rename-away is a
/// removal for the old path. Access notifications and kinds with no path
/// semantics are dropped.
fn classify(event: &Event) -> Vec<(PathBuf, FsEventKind)> {
    let Some(first) = event.paths.first() else {
        return Vec::new();
    };

    match &event.kind {
        EventKind::Create(_) => {
            vec![(first.clone(), FsEventKind::Created)]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            match event.paths.get(1) {
                Some(second) => vec![(
                    second.clone(),
                    FsEventKind::RenamedFrom(first.clone()),
                )],
                None => vec![(first.clone(), FsEventKind::Removed)],
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            vec![(first.clone(), FsEventKind::Removed)]
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
            vec![(first.clone(), FsEventKind::Created)]
        }
        EventKind::Modify(_) => {
            vec![(first.clone(), FsEventKind::Modified)]
        }
        EventKind::Remove(_) => {
            vec![(first.clone(), FsEventKind::Removed)]
        }
        // Access events and catch-all kinds carry no state change worth
        // processing; the periodic scan covers anything they might hide.
        EventKind::Access(_) | EventKind::Any | EventKind::Other => Vec::new(),
    }
}

/// Routes classified events through debouncing, move correlation, and
/// processing. Shared by the live watcher and by tests that feed synthetic
/// event streams.
pub struct WatchPipeline {
    root: PathBuf,
    ctx: Arc<ProcessContext>,
    debouncer: Arc<Debouncer>,
    detector: Arc<MoveDetector>,
    move_window: Duration,
}

impl std::fmt::Debug for WatchPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchPipeline")
            .field("root", &self.root)
            .field("debouncer", &self.debouncer)
            .field("detector", &self.detector)
            .finish()
    }
}

impl WatchPipeline {
    pub(crate) fn new(
        root: PathBuf,
        ctx: Arc<ProcessContext>,
        debounce_window: Duration,
        move_window: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<DebouncedEvent>) {
        let (debouncer, effective_rx) = Debouncer::new(debounce_window);
        let pipeline = Arc::new(Self {
            root,
            ctx,
            debouncer: Arc::new(debouncer),
            detector: Arc::new(MoveDetector::new(move_window)),
            move_window,
        });
        (pipeline, effective_rx)
    }

    /// Feed one classified notification into the pipeline.
    pub async fn handle_raw(&self, path: PathBuf, kind: FsEventKind) {
        // The root itself is the tree being mirrored, never a tracked row.
        if path == self.root {
            return;
        }
        match kind {
            FsEventKind::Created => {
                if !excluded_within(&self.root, &path) {
                    self.debouncer.on_notification(path, NotifyKind::Create);
                }
            }
            FsEventKind::Modified => {
                if !excluded_within(&self.root, &path) {
                    self.debouncer.on_notification(path, NotifyKind::Write);
                }
            }
            FsEventKind::Removed => {
                if !excluded_within(&self.root, &path) {
                    self.debouncer.on_notification(path, NotifyKind::Delete);
                }
            }
            FsEventKind::RenamedFrom(old) => {
                // Both endpoints are known, so no basename correlation is
                // needed; the pairing is authoritative.
                let old_tracked = !excluded_within(&self.root, &old);
                let new_tracked = !excluded_within(&self.root, &path);
                match (old_tracked, new_tracked) {
                    (true, true) => {
                        self.debouncer
                            .on_notification(old.clone(), NotifyKind::Delete);
                        if let Err(err) =
                            self.ctx.apply_move(&old, &path).await
                        {
                            warn!(
                                old = %old.display(),
                                new = %path.display(),
                                "failed to apply rename: {err}"
                            );
                        }
                    }
                    (true, false) => {
                        // Renamed into excluded territory: the old path no
                        // longer denotes anything tracked.
                        self.debouncer.on_notification(old, NotifyKind::Delete);
                    }
                    (false, true) => {
                        self.debouncer.on_notification(path, NotifyKind::Create);
                    }
                    (false, false) => {}
                }
            }
        }
    }

    /// Act on one effective (post-debounce) event.
    pub async fn handle_effective(self: &Arc<Self>, event: DebouncedEvent) {
        match event {
            DebouncedEvent::Deleted { path } => {
                let ticket = self.detector.on_delete(&path);
                self.spawn_deferred_delete(ticket);
            }
            DebouncedEvent::Changed { path, created } => {
                let stat = match self.ctx.processor.stat(&path).await {
                    Ok(Some(stat)) => stat,
                    // Already gone again; a later notification or the next
                    // scan reconciles.
                    Ok(None) => return,
                    Err(err) => {
                        warn!(path = %path.display(), "stat failed: {err}");
                        return;
                    }
                };

                // Only a create can be the visible end of a move; a modify
                // burst on an existing path must never claim a recorded
                // deletion elsewhere.
                let origin = if created {
                    self.detector.on_create(&path)
                } else {
                    None
                };
                match origin {
                    Some(old) if old != path => {
                        if let Err(err) = self.ctx.apply_move(&old, &path).await
                        {
                            warn!(
                                old = %old.display(),
                                new = %path.display(),
                                "failed to apply correlated move: {err}"
                            );
                        }
                    }
                    _ => {
                        if let Err(err) =
                            self.ctx.upsert_path(&path, false).await
                        {
                            warn!(
                                path = %path.display(),
                                "failed to process change: {err}"
                            );
                        }
                    }
                }

                if stat.is_dir && created {
                    // Entries created inside the directory before the watch
                    // caught up never produced notifications of their own.
                    self.ingest_new_directory(&path).await;
                }
            }
        }
    }

    /// A genuine delete is confirmed only after the correlation window
    /// passes with the record unclaimed; executing it earlier would leave a
    /// correlated create nothing to migrate.
    fn spawn_deferred_delete(self: &Arc<Self>, ticket: DeletionTicket) {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(pipeline.move_window).await;
            let Some(victim) = pipeline.detector.claim(ticket) else {
                return;
            };
            // Re-stat before dropping the row: the path may have been
            // recreated, or the notification may have lied.
            match pipeline.ctx.processor.stat(&victim).await {
                Ok(None) => {
                    if let Err(err) = pipeline.ctx.apply_delete(&victim).await
                    {
                        warn!(
                            path = %victim.display(),
                            "failed to delete catalog row: {err}"
                        );
                    }
                }
                Ok(Some(_)) => {
                    debug!(
                        path = %victim.display(),
                        "path reappeared; keeping catalog row fresh"
                    );
                    if let Err(err) =
                        pipeline.ctx.upsert_path(&victim, true).await
                    {
                        warn!(
                            path = %victim.display(),
                            "failed to refresh reappeared path: {err}"
                        );
                    }
                }
                Err(err) => {
                    warn!(path = %victim.display(), "stat failed: {err}");
                }
            }
        });
    }

    /// Breadth-first sweep of a newly observed directory.
    async fn ingest_new_directory(&self, dir: &Path) {
        let mut queue = vec![dir.to_path_buf()];
        while let Some(current) = queue.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(err) => {
                    warn!(
                        path = %current.display(),
                        "failed to read new directory: {err}"
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
                            path = %current.display(),
                            "failed to read directory entry: {err}"
                        );
                        break;
                    }
                };
                let child = entry.path();
                if excluded_within(&self.root, &child) {
                    continue;
                }
                if let Err(err) = self.ctx.upsert_path(&child, true).await {
                    warn!(
                        path = %child.display(),
                        "failed to ingest new entry: {err}"
                    );
                    continue;
                }
                if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false)
                {
                    queue.push(child);
                }
            }
        }
    }

    pub(crate) fn debouncer(&self) -> &Arc<Debouncer> {
        &self.debouncer
    }
}

/// Background tasks and the live watcher instance for one root.
pub(crate) struct WatchTasks {
    watcher: RecommendedWatcher,
    raw_task: JoinHandle<()>,
    effective_task: JoinHandle<()>,
    pipeline: Arc<WatchPipeline>,
}

impl WatchTasks {
    /// Stop all watch activity: cancel in-flight debounce timers and admit
    /// no new processing.
    pub fn shutdown(self) {
        self.pipeline.debouncer().shutdown();
        self.raw_task.abort();
        self.effective_task.abort();
        drop(self.watcher); // Dropping the watcher stops notify streams.
    }
}

impl std::fmt::Debug for WatchTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchTasks")
            .field("raw_finished", &self.raw_task.is_finished())
            .field("effective_finished", &self.effective_task.is_finished())
            .finish()
    }
}

/// Attach a recursive notify watcher to `root` and spawn the raw and
/// effective event loops.
pub(crate) async fn spawn_watch(
    pipeline: Arc<WatchPipeline>,
    mut effective_rx: mpsc::UnboundedReceiver<DebouncedEvent>,
    channel_capacity: usize,
) -> Result<WatchTasks> {
    let root = pipeline.root.clone();
    let (raw_tx, mut raw_rx) = mpsc::channel::<WatchMessage>(channel_capacity);

    let watcher = spawn_blocking(move || init_watcher(&root, raw_tx))
        .await
        .map_err(|err| {
            SyncError::Internal(format!("watcher initialization panicked: {err}"))
        })??;

    let raw_pipeline = Arc::clone(&pipeline);
    let raw_task = tokio::spawn(async move {
        while let Some(msg) = raw_rx.recv().await {
            match msg {
                WatchMessage::Event(event) => {
                    for (path, kind) in classify(&event) {
                        raw_pipeline.handle_raw(path, kind).await;
                    }
                }
                WatchMessage::Error(error) => {
                    // Dropped or garbled notifications are repaired by the
                    // next scan pass.
                    warn!("watch stream error: {error}");
                }
            }
        }
    });

    let effective_pipeline = Arc::clone(&pipeline);
    let effective_task = tokio::spawn(async move {
        while let Some(event) = effective_rx.recv().await {
            effective_pipeline.handle_effective(event).await;
        }
    });

    Ok(WatchTasks {
        watcher,
        raw_task,
        effective_task,
        pipeline,
    })
}

fn init_watcher(
    root: &Path,
    tx: mpsc::Sender<WatchMessage>,
) -> Result<RecommendedWatcher> {
    let root_display = root.display().to_string();
    let tx_event = tx;
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if tx_event.blocking_send(WatchMessage::Event(event)).is_err() {
                    warn!("watch channel closed; dropping event");
                }
            }
            Err(err) => {
                let _ = tx_event.blocking_send(WatchMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    )
    .map_err(|err| {
        SyncError::Internal(format!(
            "failed to create watcher for {root_display}: {err}"
        ))
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|err| {
            SyncError::Internal(format!(
                "failed to watch {}: {}",
                root.display(),
                err
            ))
        })?;

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};

    #[test]
    fn creates_and_writes_classify_directly() {
        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("/vault/doc.md"));
        assert_eq!(
            classify(&event),
            vec![(PathBuf::from("/vault/doc.md"), FsEventKind::Created)]
        );

        let event =
            Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                .add_path(PathBuf::from("/vault/doc.md"));
        assert_eq!(
            classify(&event),
            vec![(PathBuf::from("/vault/doc.md"), FsEventKind::Modified)]
        );
    }

    #[test]
    fn rename_away_is_a_removal_for_the_old_path() {
        let event =
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path(PathBuf::from("/vault/doc.md"));
        assert_eq!(
            classify(&event),
            vec![(PathBuf::from("/vault/doc.md"), FsEventKind::Removed)]
        );
    }

    #[test]
    fn two_sided_rename_keeps_the_pairing() {
        let event =
            Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path(PathBuf::from("/vault/a.md"))
                .add_path(PathBuf::from("/vault/b.md"));
        assert_eq!(
            classify(&event),
            vec![(
                PathBuf::from("/vault/b.md"),
                FsEventKind::RenamedFrom(PathBuf::from("/vault/a.md"))
            )]
        );
    }

    #[test]
    fn noise_kinds_are_dropped_at_the_boundary() {
        let event = Event::new(EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions,
        )))
        .add_path(PathBuf::from("/vault/doc.md"));
        // Metadata changes still classify as modifications.
        assert_eq!(classify(&event).len(), 1);

        let event = Event::new(EventKind::Any)
            .add_path(PathBuf::from("/vault/doc.md"));
        assert!(classify(&event).is_empty());

        let event = Event::new(EventKind::Remove(RemoveKind::File));
        assert!(classify(&event).is_empty(), "no path, nothing to classify");
    }
}
