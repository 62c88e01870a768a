//! Persistence for project state, archived history and the active-project
//! pointer. Every call is atomic.

pub mod sqlite;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::orchestrator::ProjectState;
use crate::phase::Phase;

pub use sqlite::SqliteStore;

/// Row in the project list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub root_folder: PathBuf,
    pub phase: Phase,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProjectState> for ProjectSummary {
    fn from(state: &ProjectState) -> Self {
        Self {
            id: state.id.clone(),
            name: state.name.clone(),
            root_folder: state.root_folder.clone(),
            phase: state.phase,
            updated_at: state.updated_at,
        }
    }
}

/// Immutable archival snapshot of an exported project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectHistoryRecord {
    pub history_id: i64,
    pub project_id: String,
    pub project_name: String,
    pub root_folder: PathBuf,
    pub phase: Phase,
    pub snapshot: ProjectState,
    pub archive_path: Option<PathBuf>,
    pub archived_at: DateTime<Utc>,
}

pub trait StateStore: Send + Sync {
    fn load_state(&self, project_id: &str) -> Result<Option<ProjectState>>;

    fn save_state(&self, state: &ProjectState) -> Result<()>;

    fn list_projects(&self) -> Result<Vec<ProjectSummary>>;

    /// Insert a history record for `snapshot` and drop its active state,
    /// in one transaction.
    fn archive(
        &self,
        snapshot: &ProjectState,
        archive_path: Option<PathBuf>,
    ) -> Result<ProjectHistoryRecord>;

    fn load_history(&self, history_id: i64) -> Result<Option<ProjectHistoryRecord>>;

    fn list_history(&self) -> Result<Vec<ProjectHistoryRecord>>;

    fn delete_history(&self, history_id: i64) -> Result<bool>;

    fn active_project(&self) -> Result<Option<String>>;

    fn set_active_project(&self, project_id: Option<&str>) -> Result<()>;
}
