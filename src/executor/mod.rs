//! Task executors: the opaque workers that perform a unit of work.
//!
//! The engine never looks inside a unit of work. It hands a [`WorkRequest`] to
//! a [`TaskExecutor`] and routes the classified result through escalation.

pub mod command;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::coordinator::{TaskContext, TaskOutput};
use crate::errors::TaskFailure;
use crate::phase::Phase;
use crate::plan::Task;

pub use command::CommandExecutor;

/// What to execute: a plan task, or the single operation of a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum WorkUnit {
    PlanTask { task: Task },
    PhaseOperation { phase: Phase },
}

impl WorkUnit {
    pub fn task(task: Task) -> Self {
        WorkUnit::PlanTask { task }
    }

    pub fn phase(phase: Phase) -> Self {
        WorkUnit::PhaseOperation { phase }
    }

    /// Phase-level operations have no plan position, so they cannot be skipped.
    pub fn is_phase_level(&self) -> bool {
        matches!(self, WorkUnit::PhaseOperation { .. })
    }

    pub fn task_id(&self) -> Option<&str> {
        match self {
            WorkUnit::PlanTask { task } => Some(&task.id),
            WorkUnit::PhaseOperation { .. } => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            WorkUnit::PlanTask { task } => format!("task {} ({})", task.id, task.description),
            WorkUnit::PhaseOperation { phase } => format!("{} operation", phase.display_name()),
        }
    }
}

/// A unit of work plus the project context the executor runs it in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkRequest {
    pub project_id: String,
    pub project_name: String,
    pub root: PathBuf,
    pub phase: Phase,
    pub unit: WorkUnit,
}

/// Performs work units. Implementations classify their own failures.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        request: WorkRequest,
        ctx: TaskContext,
    ) -> Result<TaskOutput, TaskFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_unit_serializes_with_kind_tag() {
        let unit = WorkUnit::phase(Phase::Planning);
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["kind"], "phase-operation");
        assert_eq!(json["phase"], "planning");

        let unit = WorkUnit::task(Task::new("T-1", "write parser", "src/parser.rs"));
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["kind"], "plan-task");
        assert_eq!(json["task"]["id"], "T-1");

        let back: WorkUnit = serde_json::from_value(json).unwrap();
        assert_eq!(back.task_id(), Some("T-1"));
    }

    #[test]
    fn test_labels_and_levels() {
        let unit = WorkUnit::task(Task::new("T-9", "wire routes", ""));
        assert!(!unit.is_phase_level());
        assert!(unit.label().contains("T-9"));

        let unit = WorkUnit::phase(Phase::IntegrationAndVerification);
        assert!(unit.is_phase_level());
        assert_eq!(unit.task_id(), None);
        assert!(unit.label().contains("Integration"));
    }
}
