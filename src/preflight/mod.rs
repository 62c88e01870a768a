//! Preflight reconciliation: compare what the engine expects of a project's
//! working tree with what is actually on disk, before any work is submitted.

use std::path::Path;

use tracing::{info, warn};

use crate::checkpoint::Checkpoint;
use crate::errors::WorkspaceError;
use crate::tracker::{Workspace, WorkspaceStatus};

/// Number of changed paths listed in a drift summary.
const SUMMARY_PATHS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationResult {
    AllClear,
    StateDrift { summary: String },
    Unrecoverable { reason: String },
}

impl ReconciliationResult {
    /// The checkpoint to raise for this result, if any.
    pub fn into_checkpoint(self) -> Option<Checkpoint> {
        match self {
            ReconciliationResult::AllClear => None,
            ReconciliationResult::StateDrift { summary } => Some(Checkpoint::StateDrift { summary }),
            ReconciliationResult::Unrecoverable { reason } => {
                Some(Checkpoint::Unrecoverable { reason })
            }
        }
    }
}

/// Pure comparison of the expected HEAD against an observed status.
pub fn check(
    expected_head: Option<&str>,
    observed: Result<WorkspaceStatus, WorkspaceError>,
) -> ReconciliationResult {
    let status = match observed {
        Ok(status) => status,
        Err(e @ (WorkspaceError::RootMissing(_) | WorkspaceError::NotARepository(_))) => {
            return ReconciliationResult::Unrecoverable {
                reason: e.to_string(),
            };
        }
        Err(e) => {
            return ReconciliationResult::Unrecoverable {
                reason: format!("Cannot read working tree: {}", e),
            };
        }
    };

    let mut findings = Vec::new();
    if !status.is_clean() {
        let shown: Vec<String> = status
            .changed
            .iter()
            .take(SUMMARY_PATHS)
            .map(|p| p.display().to_string())
            .collect();
        let more = status.changed.len().saturating_sub(SUMMARY_PATHS);
        let mut listing = shown.join(", ");
        if more > 0 {
            listing.push_str(&format!(" and {} more", more));
        }
        findings.push(format!(
            "{} uncommitted change(s): {}",
            status.changed.len(),
            listing
        ));
    }
    if let Some(expected) = expected_head
        && status.head.as_deref() != Some(expected)
    {
        findings.push(format!(
            "HEAD moved from {} to {}",
            short_sha(expected),
            status.head.as_deref().map(short_sha).unwrap_or("(none)")
        ));
    }

    if findings.is_empty() {
        ReconciliationResult::AllClear
    } else {
        ReconciliationResult::StateDrift {
            summary: findings.join("; "),
        }
    }
}

/// Run preflight against a live working tree.
pub fn reconcile(
    workspace: &dyn Workspace,
    root: &Path,
    expected_head: Option<&str>,
) -> ReconciliationResult {
    let result = check(expected_head, workspace.status(root));
    match &result {
        ReconciliationResult::AllClear => info!(root = %root.display(), "preflight passed"),
        ReconciliationResult::StateDrift { summary } => {
            warn!(root = %root.display(), "preflight found drift: {}", summary)
        }
        ReconciliationResult::Unrecoverable { reason } => {
            warn!(root = %root.display(), "preflight failed: {}", reason)
        }
    }
    result
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
