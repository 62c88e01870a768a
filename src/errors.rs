//! Typed error hierarchy for the Waypoint engine.
//!
//! Three families cover the engine's seams:
//! - `OrchestratorError`: protocol and command failures returned to callers
//! - `TaskFailure`: classified failures reported by task executors
//! - `WorkspaceError`: working-tree capability failures

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::phase::Phase;

/// Errors returned synchronously by orchestrator commands.
///
/// Protocol errors (everything but `Workspace` and `Other`) never alter
/// persisted or in-memory state.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown phase '{0}'")]
    InvalidPhase(String),

    #[error("Decision '{decision}' is not valid: {reason}")]
    InvalidDecision { decision: String, reason: String },

    #[error("A {pending} checkpoint is already outstanding")]
    CheckpointConflict { pending: String },

    #[error("A task is already running for project {project_id}")]
    AlreadyRunning { project_id: String },

    #[error("Phase {from} does not accept '{event}'")]
    TransitionRejected { from: Phase, event: String },

    #[error("Plan is exhausted: no current task")]
    PlanExhausted,

    #[error("Plan contains no tasks")]
    EmptyPlan,

    #[error("Nothing to proceed with in phase {phase}")]
    NothingToProceed { phase: Phase },

    #[error("Awaiting a decision on the {kind} checkpoint")]
    AwaitingDecision { kind: String },

    #[error("Project {id} not found")]
    ProjectNotFound { id: String },

    #[error("History record {id} not found")]
    HistoryNotFound { id: i64 },

    #[error("No active project. Run `waypoint new` or `waypoint resume` first")]
    NoActiveProject,

    #[error("Workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// How a failed task should be treated by the escalation controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureClass {
    /// Worth retrying as-is (timeouts, rate limits, flaky tools).
    Transient,
    /// The environment is broken; retrying cannot help.
    Environment,
    /// The work itself failed (bad output, failing tests).
    Logic,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Transient => write!(f, "transient"),
            FailureClass::Environment => write!(f, "environment"),
            FailureClass::Logic => write!(f, "logic"),
        }
    }
}

impl std::str::FromStr for FailureClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "transient" => Ok(FailureClass::Transient),
            "environment" | "env" => Ok(FailureClass::Environment),
            "logic" => Ok(FailureClass::Logic),
            _ => anyhow::bail!(
                "Invalid failure class '{}'. Valid values: transient, environment, logic",
                s
            ),
        }
    }
}

/// A classified failure reported by a task executor.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{class} failure: {message}")]
pub struct TaskFailure {
    pub class: FailureClass,
    pub message: String,
}

impl TaskFailure {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Transient, message)
    }

    pub fn environment(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Environment, message)
    }

    pub fn logic(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Logic, message)
    }
}

/// Errors from the working-tree capability.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("Project root {0} does not exist")]
    RootMissing(PathBuf),

    #[error("{0} is not a git repository")]
    NotARepository(PathBuf),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
