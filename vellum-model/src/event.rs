use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Closed classification of raw operating-system notifications.
///
/// Platform specifics are translated into this variant once, at the watch
/// boundary; nothing downstream inspects raw event codes. A rename away from
/// a path means the same thing as a removal for that path: it no longer
/// denotes what it used to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEventKind {
    Created,
    Modified,
    Removed,
    RenamedFrom(PathBuf),
}

/// What an effective change did to a tracked path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Moved { from: PathBuf },
}

/// Payload handed to the downstream-processing trigger, once per effective
/// change. Delivery is at-least-once: consumers must tolerate redundant
/// notifications for the same unchanged state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
    /// True when no catalog row existed for this path before the change.
    pub is_new: bool,
    /// True when the recorded content hash changed (or the row is new).
    pub content_changed: bool,
    pub observed_at: DateTime<Utc>,
}
