//! Development plans and the cursor that walks them.
//!
//! A plan is an ordered list of micro-tasks plus the index of the next task
//! to execute. The cursor only moves forward; a new plan replaces the old
//! one wholesale.
//!
//! Plans are loaded from JSON, either a bare array of tasks or an object
//! with a `development_plan` array:
//!
//! ```json
//! {
//!   "development_plan": [
//!     { "micro_spec_id": "T-1", "task_description": "Add users table",
//!       "component_name": "db/schema.sql", "component_type": "DB_MIGRATION_SCRIPT" }
//!   ]
//! }
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::OrchestratorError;

/// Component types that change the target environment declaratively and
/// therefore stop at a manual gate before they run.
const DECLARATIVE_COMPONENT_TYPES: &[&str] = &[
    "DB_MIGRATION_SCRIPT",
    "BUILD_SCRIPT_MODIFICATION",
    "CONFIG_FILE_UPDATE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Done,
    Failed,
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A single unit of development work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    /// Reference to the artifact the task produces or changes.
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub status: TaskStatus,
    /// High-risk tasks stop at a manual gate before execution.
    #[serde(default)]
    pub requires_approval: bool,
}

impl Task {
    pub fn new(id: &str, description: &str, target: &str) -> Self {
        Self {
            id: id.to_string(),
            description: description.to_string(),
            target: target.to_string(),
            status: TaskStatus::Pending,
            requires_approval: false,
        }
    }

    pub fn with_approval(mut self) -> Self {
        self.requires_approval = true;
        self
    }

    /// Backlog item recording a task that was skipped after repeated failure.
    pub fn follow_up(failed: &Task, reason: &str) -> Self {
        Self {
            id: format!("BL-{}", &Uuid::new_v4().simple().to_string()[..8]),
            description: format!("Resolve skipped task {}: {}", failed.id, reason),
            target: failed.target.clone(),
            status: TaskStatus::Pending,
            requires_approval: false,
        }
    }
}

/// Ordered tasks plus the index of the next one to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    tasks: Vec<Task>,
    cursor: usize,
}

impl Plan {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks, cursor: 0 }
    }

    /// The next task to execute, or `None` once every task has been visited.
    pub fn current(&self) -> Option<&Task> {
        self.tasks.get(self.cursor)
    }

    /// Set the status of the current task.
    pub fn mark_current(&mut self, status: TaskStatus) -> Result<(), OrchestratorError> {
        let task = self
            .tasks
            .get_mut(self.cursor)
            .ok_or(OrchestratorError::PlanExhausted)?;
        task.status = status;
        Ok(())
    }

    /// Move past the current task.
    pub fn advance(&mut self) -> Result<(), OrchestratorError> {
        if self.current().is_none() {
            return Err(OrchestratorError::PlanExhausted);
        }
        self.cursor += 1;
        Ok(())
    }

    /// Replace the plan wholesale and rewind the cursor.
    pub fn reset(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.cursor = 0;
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.tasks.len()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }
}

/// Task as emitted by planners, with the legacy field names accepted.
#[derive(Debug, Deserialize)]
struct RawTask {
    #[serde(default, alias = "micro_spec_id")]
    id: Option<String>,
    #[serde(alias = "task_description")]
    description: String,
    #[serde(default, alias = "component_name")]
    target: String,
    #[serde(default)]
    component_type: Option<String>,
    #[serde(default)]
    requires_approval: bool,
}

impl RawTask {
    fn into_task(self, index: usize) -> Task {
        let declarative = self
            .component_type
            .as_deref()
            .is_some_and(|t| DECLARATIVE_COMPONENT_TYPES.contains(&t.to_uppercase().as_str()));
        Task {
            id: self
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| format!("T-{}", index + 1)),
            description: self.description,
            target: self.target,
            status: TaskStatus::Pending,
            requires_approval: self.requires_approval || declarative,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PlanDocument {
    Bare(Vec<RawTask>),
    Wrapped { development_plan: Vec<RawTask> },
}

/// Parse a plan document.
pub fn parse_plan(content: &str) -> Result<Vec<Task>> {
    let doc: PlanDocument =
        serde_json::from_str(content).context("Failed to parse development plan")?;
    let raw = match doc {
        PlanDocument::Bare(tasks) => tasks,
        PlanDocument::Wrapped { development_plan } => development_plan,
    };
    Ok(raw
        .into_iter()
        .enumerate()
        .map(|(i, t)| t.into_task(i))
        .collect())
}

/// Load a plan document from disk.
pub fn load_plan_file(path: &Path) -> Result<Vec<Task>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
    parse_plan(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_tasks() -> Vec<Task> {
        vec![
            Task::new("T-1", "first", "a.rs"),
            Task::new("T-2", "second", "b.rs"),
            Task::new("T-3", "third", "c.rs"),
        ]
    }

    #[test]
    fn test_cursor_counts_advances() {
        let mut plan = Plan::new(three_tasks());
        assert_eq!(plan.cursor(), 0);
        assert_eq!(plan.current().unwrap().id, "T-1");

        for expected in 1..=3 {
            plan.advance().unwrap();
            assert_eq!(plan.cursor(), expected);
            assert!(plan.cursor() <= plan.len());
        }
        assert!(plan.current().is_none());
        assert!(plan.is_complete());
    }

    #[test]
    fn test_advance_past_end_is_plan_exhausted() {
        let mut plan = Plan::new(vec![Task::new("T-1", "only", "")]);
        plan.advance().unwrap();
        let err = plan.advance().unwrap_err();
        assert!(matches!(err, OrchestratorError::PlanExhausted));
        assert_eq!(plan.cursor(), 1);
    }

    #[test]
    fn test_empty_plan_is_complete() {
        let mut plan = Plan::new(Vec::new());
        assert!(plan.is_complete());
        assert!(plan.advance().is_err());
    }

    #[test]
    fn test_reset_replaces_wholesale() {
        let mut plan = Plan::new(three_tasks());
        plan.advance().unwrap();
        plan.reset(vec![Task::new("N-1", "new", "")]);
        assert_eq!(plan.cursor(), 0);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.current().unwrap().id, "N-1");
    }

    #[test]
    fn test_mark_current() {
        let mut plan = Plan::new(three_tasks());
        plan.mark_current(TaskStatus::Done).unwrap();
        assert_eq!(plan.tasks()[0].status, TaskStatus::Done);
        assert_eq!(plan.tasks()[1].status, TaskStatus::Pending);
    }

    #[test]
    fn test_parse_bare_array() {
        let tasks = parse_plan(
            r#"[{"id": "A", "description": "do a", "target": "a.rs"},
                {"description": "do b"}]"#,
        )
        .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, "A");
        assert_eq!(tasks[1].id, "T-2");
        assert_eq!(tasks[1].target, "");
        assert!(!tasks[0].requires_approval);
    }

    #[test]
    fn test_parse_wrapped_plan_with_legacy_fields() {
        let tasks = parse_plan(
            r#"{"development_plan": [
                {"micro_spec_id": "MS-1", "task_description": "add users table",
                 "component_name": "schema.sql", "component_type": "DB_MIGRATION_SCRIPT"},
                {"micro_spec_id": "MS-2", "task_description": "add handler",
                 "component_name": "api.rs", "component_type": "FUNCTION"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(tasks[0].id, "MS-1");
        assert_eq!(tasks[0].description, "add users table");
        assert_eq!(tasks[0].target, "schema.sql");
        assert!(tasks[0].requires_approval);
        assert!(!tasks[1].requires_approval);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_plan("{\"tasks\": 3}").is_err());
        assert!(parse_plan("not json").is_err());
    }

    #[test]
    fn test_follow_up_references_failed_task() {
        let failed = Task::new("T-2", "second", "b.rs");
        let item = Task::follow_up(&failed, "tests keep failing");
        assert!(item.id.starts_with("BL-"));
        assert!(item.description.contains("T-2"));
        assert!(item.description.contains("tests keep failing"));
        assert_eq!(item.target, "b.rs");
    }

    #[test]
    fn test_load_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plan.json");
        std::fs::write(&path, r#"[{"description": "x"}]"#).unwrap();
        assert_eq!(load_plan_file(&path).unwrap().len(), 1);
        assert!(load_plan_file(&dir.path().join("missing.json")).is_err());
    }
}
