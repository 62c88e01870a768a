//! Working-tree capability used by preflight reconciliation and drift
//! resolution.

pub mod git;

use std::path::{Path, PathBuf};

use crate::errors::WorkspaceError;

pub use git::GitWorkspace;

/// Observed state of a project's working tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceStatus {
    /// HEAD commit, `None` on an unborn branch.
    pub head: Option<String>,
    /// Modified, added, deleted and untracked paths.
    pub changed: Vec<PathBuf>,
}

impl WorkspaceStatus {
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty()
    }
}

pub trait Workspace: Send + Sync {
    fn status(&self, root: &Path) -> Result<WorkspaceStatus, WorkspaceError>;

    /// Commit the given paths (all changes when empty) and return the new
    /// commit id.
    fn commit(
        &self,
        root: &Path,
        files: &[PathBuf],
        message: &str,
    ) -> Result<String, WorkspaceError>;

    /// Drop every uncommitted change, including untracked files.
    fn discard_all(&self, root: &Path) -> Result<(), WorkspaceError>;
}
