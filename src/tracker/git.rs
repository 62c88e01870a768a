use std::path::{Path, PathBuf};

use git2::build::CheckoutBuilder;
use git2::{ErrorCode, IndexAddOption, ObjectType, Repository, ResetType, Signature, Status, StatusOptions};
use tracing::info;

use super::{Workspace, WorkspaceStatus};
use crate::errors::WorkspaceError;

/// [`Workspace`] backed by libgit2.
#[derive(Debug, Clone, Default)]
pub struct GitWorkspace;

impl GitWorkspace {
    pub fn new() -> Self {
        Self
    }

    fn open(root: &Path) -> Result<Repository, WorkspaceError> {
        if !root.exists() {
            return Err(WorkspaceError::RootMissing(root.to_path_buf()));
        }
        Repository::open(root).map_err(|e| match e.code() {
            ErrorCode::NotFound => WorkspaceError::NotARepository(root.to_path_buf()),
            _ => WorkspaceError::Git(e),
        })
    }

    /// Get the HEAD commit if it exists (returns None for unborn branches)
    fn head_commit(repo: &Repository) -> Option<git2::Commit<'_>> {
        repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }

    fn untracked_paths(repo: &Repository) -> Result<Vec<PathBuf>, WorkspaceError> {
        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(false);
        let statuses = repo.statuses(Some(&mut opts))?;
        Ok(statuses
            .iter()
            .filter(|entry| entry.status().contains(Status::WT_NEW))
            .filter_map(|entry| entry.path().map(PathBuf::from))
            .collect())
    }
}

impl Workspace for GitWorkspace {
    fn status(&self, root: &Path) -> Result<WorkspaceStatus, WorkspaceError> {
        let repo = Self::open(root)?;

        let mut opts = StatusOptions::new();
        opts.include_untracked(true)
            .recurse_untracked_dirs(true)
            .include_ignored(false);
        let statuses = repo.statuses(Some(&mut opts))?;

        let changed = statuses
            .iter()
            .filter(|entry| {
                let status = entry.status();
                !status.is_ignored() && status != Status::CURRENT
            })
            .filter_map(|entry| entry.path().map(PathBuf::from))
            .collect();

        Ok(WorkspaceStatus {
            head: Self::head_commit(&repo).map(|c| c.id().to_string()),
            changed,
        })
    }

    fn commit(
        &self,
        root: &Path,
        files: &[PathBuf],
        message: &str,
    ) -> Result<String, WorkspaceError> {
        let repo = Self::open(root)?;
        let mut index = repo.index()?;

        if files.is_empty() {
            index.add_all(["*"].iter(), IndexAddOption::DEFAULT, None)?;
            // Stage deletions as well.
            index.update_all(["*"].iter(), None)?;
        } else {
            for file in files {
                let relative = file.strip_prefix(root).unwrap_or(file);
                if root.join(relative).exists() {
                    index.add_path(relative)?;
                } else {
                    index.remove_path(relative)?;
                }
            }
        }
        index.write()?;

        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("waypoint", "waypoint@localhost"))?;

        // Handle unborn branch (new repo with no commits yet)
        let parent = Self::head_commit(&repo);
        let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
        let commit_id = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;

        info!(root = %root.display(), commit = %commit_id, "committed working tree");
        Ok(commit_id.to_string())
    }

    fn discard_all(&self, root: &Path) -> Result<(), WorkspaceError> {
        let repo = Self::open(root)?;

        match repo.head().ok().and_then(|h| h.peel(ObjectType::Commit).ok()) {
            Some(target) => {
                let mut checkout = CheckoutBuilder::new();
                checkout.force();
                repo.reset(&target, ResetType::Hard, Some(&mut checkout))?;
            }
            None => {
                // Unborn branch: unstage everything so it is removed below.
                let mut index = repo.index()?;
                index.clear()?;
                index.write()?;
            }
        }

        for relative in Self::untracked_paths(&repo)? {
            let path = root.join(&relative);
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            removed.map_err(|source| WorkspaceError::Io {
                path: path.clone(),
                source,
            })?;
        }

        info!(root = %root.display(), "discarded uncommitted changes");
        Ok(())
    }
}
