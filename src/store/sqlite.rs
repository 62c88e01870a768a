use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{ProjectHistoryRecord, ProjectSummary, StateStore};
use crate::orchestrator::ProjectState;

const ACTIVE_PROJECT_KEY: &str = "active_project";

/// SQLite-backed [`StateStore`].
///
/// Calls are short and synchronous; the connection sits behind a mutex so a
/// store can be shared across sessions driven from different tasks.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA busy_timeout = 5000;")
            .context("Failed to configure SQLite")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                root_folder TEXT NOT NULL,
                phase TEXT NOT NULL,
                state_json TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS project_history (
                history_id INTEGER PRIMARY KEY AUTOINCREMENT,
                project_id TEXT NOT NULL,
                project_name TEXT NOT NULL,
                root_folder TEXT NOT NULL,
                phase TEXT NOT NULL,
                snapshot_json TEXT NOT NULL,
                archive_path TEXT,
                archived_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_history_project ON project_history(project_id);
            ",
        )
        .context("Failed to create tables")?;
        Ok(())
    }
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid timestamp '{}'", value))?
        .with_timezone(&Utc))
}

struct HistoryRow {
    history_id: i64,
    project_id: String,
    project_name: String,
    root_folder: String,
    phase: String,
    snapshot_json: String,
    archive_path: Option<String>,
    archived_at: String,
}

impl HistoryRow {
    const COLUMNS: &'static str = "history_id, project_id, project_name, root_folder, phase, \
                                   snapshot_json, archive_path, archived_at";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            history_id: row.get(0)?,
            project_id: row.get(1)?,
            project_name: row.get(2)?,
            root_folder: row.get(3)?,
            phase: row.get(4)?,
            snapshot_json: row.get(5)?,
            archive_path: row.get(6)?,
            archived_at: row.get(7)?,
        })
    }

    fn into_record(self) -> Result<ProjectHistoryRecord> {
        let snapshot: ProjectState = serde_json::from_str(&self.snapshot_json)
            .with_context(|| format!("Corrupt snapshot in history record {}", self.history_id))?;
        Ok(ProjectHistoryRecord {
            history_id: self.history_id,
            project_id: self.project_id,
            project_name: self.project_name,
            root_folder: PathBuf::from(self.root_folder),
            phase: self.phase.parse()?,
            snapshot,
            archive_path: self.archive_path.map(PathBuf::from),
            archived_at: parse_time(&self.archived_at)?,
        })
    }
}

impl StateStore for SqliteStore {
    fn load_state(&self, project_id: &str) -> Result<Option<ProjectState>> {
        let conn = self.lock()?;
        let json: Option<String> = conn
            .query_row(
                "SELECT state_json FROM projects WHERE id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query project state")?;
        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt state for project {}", project_id))
        })
        .transpose()
    }

    fn save_state(&self, state: &ProjectState) -> Result<()> {
        let json = serde_json::to_string(state).context("Failed to serialize project state")?;
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO projects (id, name, root_folder, phase, state_json, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                root_folder = excluded.root_folder,
                phase = excluded.phase,
                state_json = excluded.state_json,
                updated_at = excluded.updated_at",
            params![
                state.id,
                state.name,
                state.root_folder.to_string_lossy(),
                state.phase.as_str(),
                json,
                state.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to upsert project state")?;
        tx.commit().context("Failed to commit project state")?;
        debug!(project = %state.id, phase = %state.phase, "state saved");
        Ok(())
    }

    fn list_projects(&self) -> Result<Vec<ProjectSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, name, root_folder, phase, updated_at FROM projects
                 ORDER BY updated_at DESC",
            )
            .context("Failed to prepare list_projects")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .context("Failed to query projects")?;

        let mut projects = Vec::new();
        for row in rows {
            let (id, name, root, phase, updated_at) = row.context("Failed to read project row")?;
            projects.push(ProjectSummary {
                id,
                name,
                root_folder: PathBuf::from(root),
                phase: phase.parse()?,
                updated_at: parse_time(&updated_at)?,
            });
        }
        Ok(projects)
    }

    fn archive(
        &self,
        snapshot: &ProjectState,
        archive_path: Option<PathBuf>,
    ) -> Result<ProjectHistoryRecord> {
        let json = serde_json::to_string(snapshot).context("Failed to serialize snapshot")?;
        let archived_at = Utc::now();

        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            "INSERT INTO project_history
                (project_id, project_name, root_folder, phase, snapshot_json, archive_path, archived_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.id,
                snapshot.name,
                snapshot.root_folder.to_string_lossy(),
                snapshot.phase.as_str(),
                json,
                archive_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                archived_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert history record")?;
        let history_id = tx.last_insert_rowid();
        tx.execute("DELETE FROM projects WHERE id = ?1", params![snapshot.id])
            .context("Failed to delete active state")?;
        tx.execute(
            "DELETE FROM settings WHERE key = ?1 AND value = ?2",
            params![ACTIVE_PROJECT_KEY, snapshot.id],
        )
        .context("Failed to clear active project")?;
        tx.commit().context("Failed to commit archive")?;

        Ok(ProjectHistoryRecord {
            history_id,
            project_id: snapshot.id.clone(),
            project_name: snapshot.name.clone(),
            root_folder: snapshot.root_folder.clone(),
            phase: snapshot.phase,
            snapshot: snapshot.clone(),
            archive_path,
            archived_at,
        })
    }

    fn load_history(&self, history_id: i64) -> Result<Option<ProjectHistoryRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM project_history WHERE history_id = ?1",
                    HistoryRow::COLUMNS
                ),
                params![history_id],
                HistoryRow::from_row,
            )
            .optional()
            .context("Failed to query history record")?;
        row.map(HistoryRow::into_record).transpose()
    }

    fn list_history(&self) -> Result<Vec<ProjectHistoryRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM project_history ORDER BY history_id DESC",
                HistoryRow::COLUMNS
            ))
            .context("Failed to prepare list_history")?;
        let rows = stmt
            .query_map([], HistoryRow::from_row)
            .context("Failed to query history")?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read history row")?.into_record()?);
        }
        Ok(records)
    }

    fn delete_history(&self, history_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let affected = conn
            .execute(
                "DELETE FROM project_history WHERE history_id = ?1",
                params![history_id],
            )
            .context("Failed to delete history record")?;
        Ok(affected > 0)
    }

    fn active_project(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![ACTIVE_PROJECT_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("Failed to query active project")
    }

    fn set_active_project(&self, project_id: Option<&str>) -> Result<()> {
        let conn = self.lock()?;
        match project_id {
            Some(id) => conn
                .execute(
                    "INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = datetime('now')",
                    params![ACTIVE_PROJECT_KEY, id],
                )
                .context("Failed to set active project")?,
            None => conn
                .execute(
                    "DELETE FROM settings WHERE key = ?1",
                    params![ACTIVE_PROJECT_KEY],
                )
                .context("Failed to clear active project")?,
        };
        Ok(())
    }
}
