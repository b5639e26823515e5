use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which collaborator store a derived record lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Search index entry derived from file content.
    SearchIndex,
    /// User pin marker on a tracked path.
    Pin,
    /// Archived binary snapshot keyed by the source path.
    Archive,
}

/// Reference to a derived record keyed by a tracked path.
///
/// These rows are not owned by the engine, but the engine is responsible for
/// cascading path renames and deletions across them so no reference ever
/// points at a non-existent or superseded path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub id: Uuid,
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl ArtifactRef {
    pub fn new(path: PathBuf, kind: ArtifactKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            path,
            kind,
        }
    }
}
