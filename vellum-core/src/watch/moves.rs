//! Infers semantic moves from primitive delete-then-create pairs.
//!
//! The operating system reports a move as a delete at one path followed by a
//! create at another. A delete observation is recorded here and claimed by a
//! matching create of the same basename inside the correlation window; an
//! unclaimed record confirms a genuine delete.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

/// Suffixes of editor scratch files that must not participate in move
/// correlation; atomic-save patterns (write temp, rename over target) would
/// otherwise read as the user's file moving to a scratch name.
const TRANSIENT_SUFFIXES: &[&str] = &["~", ".tmp", ".swp", ".swx"];

/// Handle to one recorded deletion, held by the deferred delete that
/// executes if no create claims the record first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionTicket(u64);

struct RecentDeletion {
    id: u64,
    path: PathBuf,
    observed_at: Instant,
    /// Deletions of transient names are tracked for their own deferred
    /// delete but never offered as a move source.
    correlatable: bool,
}

/// Correlates recent deletions with subsequent creates.
pub struct MoveDetector {
    window: Duration,
    state: Mutex<DetectorState>,
}

#[derive(Default)]
struct DetectorState {
    next_id: u64,
    records: Vec<RecentDeletion>,
}

impl MoveDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(DetectorState::default()),
        }
    }

    /// Record an observed deletion. The returned ticket is claimed either by
    /// a correlated create (the pair becomes a move) or by the caller's
    /// deferred delete once the window passes.
    pub fn on_delete(&self, path: &Path) -> DeletionTicket {
        let mut state = self.state.lock().expect("move detector poisoned");
        self.prune_stale(&mut state);
        state.next_id += 1;
        let id = state.next_id;
        state.records.push(RecentDeletion {
            id,
            path: path.to_path_buf(),
            observed_at: Instant::now(),
            correlatable: !is_transient_name(path),
        });
        DeletionTicket(id)
    }

    /// Match a create against recorded deletions.
    ///
    /// Returns the origin path when a deletion of the same basename is
    /// within the window; the record is consumed so its deferred delete
    /// becomes a no-op. When several records share the basename (a rapid
    /// rename chain), the earliest recorded one wins: it has waited the
    /// longest and is the most likely true origin of the visible create.
    pub fn on_create(&self, path: &Path) -> Option<PathBuf> {
        let now = Instant::now();
        let mut state = self.state.lock().expect("move detector poisoned");
        self.prune_stale(&mut state);

        if is_transient_name(path) {
            return None;
        }
        let basename = path.file_name()?;

        let candidate = state
            .records
            .iter()
            .filter(|record| {
                record.correlatable
                    && record.path.file_name() == Some(basename)
                    && now.duration_since(record.observed_at) <= self.window
            })
            .min_by_key(|record| record.observed_at)?;
        let id = candidate.id;

        let index =
            state.records.iter().position(|record| record.id == id)?;
        Some(state.records.swap_remove(index).path)
    }

    /// Consume a record by ticket. `Some` means no create claimed it: the
    /// deletion is genuine and the caller should drop the catalog row.
    pub fn claim(&self, ticket: DeletionTicket) -> Option<PathBuf> {
        let mut state = self.state.lock().expect("move detector poisoned");
        let index = state
            .records
            .iter()
            .position(|record| record.id == ticket.0)?;
        Some(state.records.swap_remove(index).path)
    }

    /// Lazy expiry: unclaimed records are dropped once their deferred
    /// delete has had ample time to fire, so the set stays bounded even if
    /// that task was cancelled.
    fn prune_stale(&self, state: &mut DetectorState) {
        let now = Instant::now();
        let stale = self.window * 2;
        state
            .records
            .retain(|record| now.duration_since(record.observed_at) <= stale);
    }

    #[cfg(test)]
    fn record_count(&self) -> usize {
        self.state
            .lock()
            .expect("move detector poisoned")
            .records
            .len()
    }
}

impl fmt::Debug for MoveDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let records = self
            .state
            .lock()
            .map(|state| state.records.len())
            .unwrap_or(0);
        f.debug_struct("MoveDetector")
            .field("window", &self.window)
            .field("records", &records)
            .finish()
    }
}

/// Conventional temporary/backup naming: leading-dot scratch names and
/// trailing backup suffixes.
fn is_transient_name(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return true;
    };
    name.starts_with('.')
        || TRANSIENT_SUFFIXES
            .iter()
            .any(|suffix| name.ends_with(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delete_then_create_of_same_basename_is_a_move() {
        let detector = MoveDetector::new(Duration::from_millis(500));
        let ticket = detector.on_delete(Path::new("/vault/inbox/doc.md"));

        let origin = detector.on_create(Path::new("/vault/archive/doc.md"));
        assert_eq!(origin, Some(PathBuf::from("/vault/inbox/doc.md")));
        // The record is consumed; the deferred delete finds nothing.
        assert!(detector.claim(ticket).is_none());
    }

    #[tokio::test]
    async fn different_basenames_do_not_correlate() {
        let detector = MoveDetector::new(Duration::from_millis(500));
        detector.on_delete(Path::new("/vault/doc.md"));
        assert!(detector.on_create(Path::new("/vault/other.md")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn records_outside_the_window_do_not_correlate() {
        let detector = MoveDetector::new(Duration::from_millis(100));
        let ticket = detector.on_delete(Path::new("/vault/doc.md"));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(detector.on_create(Path::new("/vault/sub/doc.md")).is_none());
        // Unclaimed after the window: the deletion is genuine.
        assert_eq!(
            detector.claim(ticket),
            Some(PathBuf::from("/vault/doc.md"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn oldest_matching_record_wins_the_tie_break() {
        let detector = MoveDetector::new(Duration::from_millis(500));
        detector.on_delete(Path::new("/vault/a/doc.md"));
        tokio::time::advance(Duration::from_millis(10)).await;
        detector.on_delete(Path::new("/vault/b/doc.md"));

        let origin = detector.on_create(Path::new("/vault/c/doc.md"));
        assert_eq!(origin, Some(PathBuf::from("/vault/a/doc.md")));
        // The younger record remains for the next create.
        let origin = detector.on_create(Path::new("/vault/d/doc.md"));
        assert_eq!(origin, Some(PathBuf::from("/vault/b/doc.md")));
    }

    #[tokio::test]
    async fn transient_names_never_correlate() {
        let detector = MoveDetector::new(Duration::from_millis(500));

        // Backup suffix as the deleted side.
        detector.on_delete(Path::new("/vault/doc.md~"));
        assert!(detector.on_create(Path::new("/vault/doc.md~")).is_none());

        // Scratch file as the created side.
        detector.on_delete(Path::new("/vault/doc.md"));
        assert!(detector.on_create(Path::new("/vault/.doc.md.tmp")).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_records_are_pruned_lazily() {
        let detector = MoveDetector::new(Duration::from_millis(100));
        detector.on_delete(Path::new("/vault/doc.md"));
        assert_eq!(detector.record_count(), 1);

        tokio::time::advance(Duration::from_millis(250)).await;
        detector.on_create(Path::new("/vault/unrelated.md"));
        assert_eq!(detector.record_count(), 0);
    }

    #[tokio::test]
    async fn claim_is_single_use() {
        let detector = MoveDetector::new(Duration::from_millis(500));
        let ticket = detector.on_delete(Path::new("/vault/doc.md"));
        assert!(detector.claim(ticket).is_some());
        assert!(detector.claim(ticket).is_none());
    }
}
