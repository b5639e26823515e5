//! Coalesces bursts of raw per-path notifications into single effective
//! events.
//!
//! A single logical write frequently manifests as many raw notifications,
//! including spurious duplicates; processing each would waste work and risk
//! reading a half-written file. Each path gets an independent timer that is
//! reset on every repeat notification and promoted to one effective event
//! once the path stays quiet for the configured window. Deletions are never
//! delayed: a vanished file cannot be further mutated.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Raw notification kinds fed into the debouncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Create,
    Write,
    Delete,
}

/// One effective event per quiet period (or per deletion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebouncedEvent {
    /// A create/write burst settled; `created` reflects the first raw
    /// notification of the burst.
    Changed { path: PathBuf, created: bool },
    /// Passed through immediately, cancelling any pending timer.
    Deleted { path: PathBuf },
}

struct PendingTimer {
    created: bool,
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-path burst coalescing. Timers are independent per path and never
/// block one another.
pub struct Debouncer {
    window: Duration,
    tx: mpsc::UnboundedSender<DebouncedEvent>,
    pending: Arc<Mutex<HashMap<PathBuf, PendingTimer>>>,
    generation: Mutex<u64>,
}

impl Debouncer {
    /// Returns the debouncer and the receiver of effective events.
    pub fn new(
        window: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<DebouncedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                window,
                tx,
                pending: Arc::new(Mutex::new(HashMap::new())),
                generation: Mutex::new(0),
            },
            rx,
        )
    }

    /// Feed one raw notification for `path`.
    pub fn on_notification(&self, path: PathBuf, kind: NotifyKind) {
        if kind == NotifyKind::Delete {
            if let Some(timer) = self
                .pending
                .lock()
                .expect("debounce table poisoned")
                .remove(&path)
            {
                timer.handle.abort();
            }
            if self.tx.send(DebouncedEvent::Deleted { path }).is_err() {
                warn!("debounce receiver dropped; deletion event lost");
            }
            return;
        }

        let generation = {
            let mut counter =
                self.generation.lock().expect("debounce counter poisoned");
            *counter += 1;
            *counter
        };

        let mut pending =
            self.pending.lock().expect("debounce table poisoned");
        let created = match pending.remove(&path) {
            Some(timer) => {
                timer.handle.abort();
                // The burst keeps the kind of its first notification.
                timer.created
            }
            None => kind == NotifyKind::Create,
        };

        let handle = self.spawn_timer(path.clone(), created, generation);
        pending.insert(
            path,
            PendingTimer {
                created,
                generation,
                handle,
            },
        );
    }

    /// Cancel every pending timer. Used on service shutdown: drain, don't
    /// queue.
    pub fn shutdown(&self) {
        let mut pending =
            self.pending.lock().expect("debounce table poisoned");
        for (_, timer) in pending.drain() {
            timer.handle.abort();
        }
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("debounce table poisoned").len()
    }

    fn spawn_timer(
        &self,
        path: PathBuf,
        created: bool,
        generation: u64,
    ) -> JoinHandle<()> {
        let window = self.window;
        let tx = self.tx.clone();
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut table =
                    pending.lock().expect("debounce table poisoned");
                match table.get(&path) {
                    Some(timer) if timer.generation == generation => {
                        table.remove(&path);
                    }
                    // Superseded by a newer notification while we slept.
                    _ => return,
                }
            }
            let _ = tx.send(DebouncedEvent::Changed { path, created });
        })
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending =
            self.pending.lock().map(|table| table.len()).unwrap_or(0);
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .field("pending", &pending)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_burst_collapses_into_one_event() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(20));
        let path = PathBuf::from("/vault/doc.md");

        debouncer.on_notification(path.clone(), NotifyKind::Create);
        for _ in 0..20 {
            debouncer.on_notification(path.clone(), NotifyKind::Write);
        }

        let event =
            tokio::time::timeout(Duration::from_millis(500), rx.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(
            event,
            DebouncedEvent::Changed {
                path,
                created: true
            }
        );
        // Nothing further queued.
        assert!(rx.try_recv().is_err());
        assert_eq!(debouncer.pending_count(), 0);
    }

    #[tokio::test]
    async fn deletions_pass_through_immediately() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_secs(30));
        let path = PathBuf::from("/vault/doc.md");

        debouncer.on_notification(path.clone(), NotifyKind::Write);
        debouncer.on_notification(path.clone(), NotifyKind::Delete);

        // The long pending timer was cancelled; only the delete arrives.
        let event = rx.try_recv().unwrap();
        assert_eq!(event, DebouncedEvent::Deleted { path });
        assert_eq!(debouncer.pending_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn repeat_notifications_reset_the_timer() {
        tokio::time::pause();
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(100));
        let path = PathBuf::from("/vault/doc.md");

        debouncer.on_notification(path.clone(), NotifyKind::Write);
        // Let the spawned timer be polled so it registers its deadline
        // against the current (paused) clock before we advance it.
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(rx.try_recv().is_err());

        debouncer.on_notification(path.clone(), NotifyKind::Write);
        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_millis(60)).await;
        // 120ms since the first notification, 60ms since the reset: still
        // pending.
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(50)).await;
        let event =
            tokio::time::timeout(Duration::from_millis(10), rx.recv())
                .await
                .unwrap()
                .unwrap();
        assert_eq!(
            event,
            DebouncedEvent::Changed {
                path,
                created: false
            }
        );
    }

    #[tokio::test]
    async fn independent_paths_do_not_interfere() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(20));
        debouncer.on_notification(
            PathBuf::from("/vault/a.md"),
            NotifyKind::Write,
        );
        debouncer.on_notification(
            PathBuf::from("/vault/b.md"),
            NotifyKind::Write,
        );

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event =
                tokio::time::timeout(Duration::from_millis(500), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
            if let DebouncedEvent::Changed { path, .. } = event {
                seen.push(path);
            }
        }
        seen.sort();
        assert_eq!(
            seen,
            vec![PathBuf::from("/vault/a.md"), PathBuf::from("/vault/b.md")]
        );
    }

    #[tokio::test]
    async fn shutdown_drops_pending_timers() {
        let (debouncer, mut rx) = Debouncer::new(Duration::from_millis(10));
        debouncer.on_notification(
            PathBuf::from("/vault/doc.md"),
            NotifyKind::Write,
        );
        debouncer.shutdown();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
