//! Checkpoints: durable suspension points that need an external decision.
//!
//! Each checkpoint kind carries only its own fields and offers a closed set
//! of [`Decision`]s. At most one checkpoint is outstanding per project; the
//! orchestrator's kind-specific handler clears it exactly once.
//!
//! | Kind                       | Options                                                    |
//! |----------------------------|------------------------------------------------------------|
//! | `debug-escalation`         | retry, pause, skip (plan tasks only)                       |
//! | `state-drift`              | proceed-ignoring-drift, commit/discard external changes, pause |
//! | `unrecoverable`            | return-to-project-list                                     |
//! | `manual-gate`              | execute-automatically, will-execute-manually               |
//! | `integration-confirmation` | proceed-to-integration, pause                              |

pub mod prompt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OrchestratorError, TaskFailure};
use crate::executor::WorkUnit;
use crate::phase::Phase;

/// The reason a workflow is suspended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Checkpoint {
    /// A unit failed beyond automatic recovery.
    DebugEscalation {
        unit: WorkUnit,
        failure: TaskFailure,
        attempts: u32,
    },
    /// The working tree changed outside the engine.
    StateDrift { summary: String },
    /// The project cannot be reconciled at all.
    Unrecoverable { reason: String },
    /// A high-risk task waits for approval before it runs.
    ManualGate {
        task_id: String,
        description: String,
    },
    /// The plan finished with known issues still in the backlog.
    IntegrationConfirmation { known_issues: Vec<String> },
}

impl Checkpoint {
    pub fn kind(&self) -> &'static str {
        match self {
            Checkpoint::DebugEscalation { .. } => "debug-escalation",
            Checkpoint::StateDrift { .. } => "state-drift",
            Checkpoint::Unrecoverable { .. } => "unrecoverable",
            Checkpoint::ManualGate { .. } => "manual-gate",
            Checkpoint::IntegrationConfirmation { .. } => "integration-confirmation",
        }
    }

    /// Raised by preflight reconciliation rather than by work or gates.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            Checkpoint::StateDrift { .. } | Checkpoint::Unrecoverable { .. }
        )
    }

    /// The phase the project waits in while this checkpoint is outstanding.
    pub fn awaiting_phase(&self) -> Phase {
        match self {
            Checkpoint::DebugEscalation { .. } => Phase::DebugEscalation,
            Checkpoint::StateDrift { .. } | Checkpoint::Unrecoverable { .. } => {
                Phase::AwaitingPreflightResolution
            }
            Checkpoint::ManualGate { .. } => Phase::AwaitingManualGate,
            Checkpoint::IntegrationConfirmation { .. } => Phase::AwaitingIntegrationConfirmation,
        }
    }

    /// Decisions offered for this checkpoint, in display order.
    pub fn options(&self) -> Vec<Decision> {
        match self {
            Checkpoint::DebugEscalation { unit, .. } => {
                let mut options = vec![Decision::Retry, Decision::Pause];
                if !unit.is_phase_level() {
                    options.push(Decision::Skip);
                }
                options
            }
            Checkpoint::StateDrift { .. } => vec![
                Decision::ProceedIgnoringDrift,
                Decision::CommitExternalChanges,
                Decision::DiscardExternalChanges,
                Decision::Pause,
            ],
            Checkpoint::Unrecoverable { .. } => vec![Decision::ReturnToProjectList],
            Checkpoint::ManualGate { .. } => vec![
                Decision::ExecuteAutomatically,
                Decision::WillExecuteManually,
            ],
            Checkpoint::IntegrationConfirmation { .. } => {
                vec![Decision::ProceedToIntegration, Decision::Pause]
            }
        }
    }

    /// One-line description for status output.
    pub fn headline(&self) -> String {
        match self {
            Checkpoint::DebugEscalation {
                unit,
                failure,
                attempts,
            } => format!(
                "{} failed after {} attempt(s): {}",
                unit.label(),
                attempts,
                failure
            ),
            Checkpoint::StateDrift { summary } => format!("Working tree drifted: {}", summary),
            Checkpoint::Unrecoverable { reason } => format!("Project cannot be resumed: {}", reason),
            Checkpoint::ManualGate {
                task_id,
                description,
            } => format!("Task {} needs approval: {}", task_id, description),
            Checkpoint::IntegrationConfirmation { known_issues } => format!(
                "Plan complete with {} known issue(s) in the backlog",
                known_issues.len()
            ),
        }
    }
}

/// A resolution option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Retry,
    Pause,
    Skip,
    ProceedIgnoringDrift,
    CommitExternalChanges,
    DiscardExternalChanges,
    ReturnToProjectList,
    ExecuteAutomatically,
    WillExecuteManually,
    ProceedToIntegration,
}

impl Decision {
    pub const ALL: [Decision; 10] = [
        Decision::Retry,
        Decision::Pause,
        Decision::Skip,
        Decision::ProceedIgnoringDrift,
        Decision::CommitExternalChanges,
        Decision::DiscardExternalChanges,
        Decision::ReturnToProjectList,
        Decision::ExecuteAutomatically,
        Decision::WillExecuteManually,
        Decision::ProceedToIntegration,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Retry => "retry",
            Decision::Pause => "pause",
            Decision::Skip => "skip",
            Decision::ProceedIgnoringDrift => "proceed-ignoring-drift",
            Decision::CommitExternalChanges => "commit-external-changes",
            Decision::DiscardExternalChanges => "discard-external-changes",
            Decision::ReturnToProjectList => "return-to-project-list",
            Decision::ExecuteAutomatically => "execute-automatically",
            Decision::WillExecuteManually => "will-execute-manually",
            Decision::ProceedToIntegration => "proceed-to-integration",
        }
    }

    /// Prompt text for interactive selection.
    pub fn label(self) -> &'static str {
        match self {
            Decision::Retry => "Retry the failed work",
            Decision::Pause => "Pause for manual intervention",
            Decision::Skip => "Skip the task and log it to the backlog",
            Decision::ProceedIgnoringDrift => "Proceed and accept the current working tree",
            Decision::CommitExternalChanges => "Commit the external changes, then proceed",
            Decision::DiscardExternalChanges => "Discard the external changes, then proceed",
            Decision::ReturnToProjectList => "Return to the project list",
            Decision::ExecuteAutomatically => "Execute the task automatically",
            Decision::WillExecuteManually => "I will execute it manually",
            Decision::ProceedToIntegration => "Proceed to integration anyway",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Decision {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_lowercase().replace('_', "-");
        let alias = match name.as_str() {
            "pause-for-manual-resolution" | "manual-pause" => "pause",
            "ignore" => "skip",
            "proceed" => "proceed-ignoring-drift",
            "commit" => "commit-external-changes",
            "discard" => "discard-external-changes",
            other => other,
        };
        Decision::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == alias)
            .ok_or_else(|| OrchestratorError::InvalidDecision {
                decision: s.to_string(),
                reason: "unknown decision".to_string(),
            })
    }
}

/// An outstanding checkpoint together with its resolution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRequest {
    pub checkpoint: Checkpoint,
    pub options: Vec<Decision>,
    /// Phase to return to once the checkpoint is resolved.
    pub resume_phase: Phase,
    pub raised_at: DateTime<Utc>,
}

impl CheckpointRequest {
    pub fn new(checkpoint: Checkpoint, resume_phase: Phase) -> Self {
        let options = checkpoint.options();
        Self {
            checkpoint,
            options,
            resume_phase,
            raised_at: Utc::now(),
        }
    }

    pub fn offers(&self, decision: Decision) -> bool {
        self.options.contains(&decision)
    }
}

/// Fail with `CheckpointConflict` if a checkpoint is already outstanding.
pub fn ensure_clear(pending: Option<&CheckpointRequest>) -> Result<(), OrchestratorError> {
    match pending {
        Some(request) => Err(OrchestratorError::CheckpointConflict {
            pending: request.checkpoint.kind().to_string(),
        }),
        None => Ok(()),
    }
}

/// Check that `decision` resolves the outstanding checkpoint.
///
/// On error nothing changes and the checkpoint stays outstanding.
pub fn validate_decision(
    pending: Option<&CheckpointRequest>,
    decision: Decision,
) -> Result<&CheckpointRequest, OrchestratorError> {
    let request = pending.ok_or_else(|| OrchestratorError::InvalidDecision {
        decision: decision.to_string(),
        reason: "no checkpoint is outstanding".to_string(),
    })?;
    if !request.offers(decision) {
        return Err(OrchestratorError::InvalidDecision {
            decision: decision.to_string(),
            reason: format!(
                "{} checkpoint offers: {}",
                request.checkpoint.kind(),
                request
                    .options
                    .iter()
                    .map(|d| d.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }
    Ok(request)
}
