//! The closed set of workflow phases and the transition table between them.
//!
//! The linear delivery path is:
//!
//! ```text
//! idle → environment-setup → spec-elaboration → ux-ui-design → technical-specification
//!      → build-script-setup → test-environment-setup → coding-standard-generation
//!      → planning → development → plan-complete → integration-and-verification
//!      → manual-ui-testing → completed
//! ```
//!
//! Side paths cover optional phases (`skip`), change requests and bug reports,
//! the awaiting phases entered while a checkpoint is outstanding, the durable
//! `paused` phase, and auxiliary detours that are never persisted.

use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// A named stage of the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    EnvironmentSetup,
    SpecElaboration,
    UxUiDesign,
    TechnicalSpecification,
    BuildScriptSetup,
    TestEnvironmentSetup,
    CodingStandardGeneration,
    Planning,
    Development,
    PlanComplete,
    IntegrationAndVerification,
    ManualUiTesting,
    Completed,
    RaisingChangeRequest,
    ReportingOperationalBug,
    AwaitingManualGate,
    AwaitingIntegrationConfirmation,
    AwaitingPreflightResolution,
    DebugEscalation,
    Paused,
    ViewingProjectHistory,
    EditingChangeRequest,
}

/// Events accepted by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Leave `idle` and begin the delivery path.
    Start,
    /// The current phase's work finished successfully.
    WorkCompleted,
    /// Skip an optional phase.
    Skip,
    /// A plan was installed for development.
    PlanLoaded,
    /// The plan cursor reached the end of the plan.
    PlanExhausted,
    /// Move from a completed plan into integration.
    BeginIntegration,
    RaiseChangeRequest,
    ReportBug,
    /// Enter the given awaiting phase while a checkpoint is outstanding.
    AwaitDecision(Phase),
    /// Leave an awaiting phase or `paused` for the given operational phase.
    Resume(Phase),
    Pause,
    /// Drop all work and return to `idle`.
    Abandon,
}

impl std::fmt::Display for PhaseEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseEvent::Start => write!(f, "start"),
            PhaseEvent::WorkCompleted => write!(f, "work-completed"),
            PhaseEvent::Skip => write!(f, "skip"),
            PhaseEvent::PlanLoaded => write!(f, "plan-loaded"),
            PhaseEvent::PlanExhausted => write!(f, "plan-exhausted"),
            PhaseEvent::BeginIntegration => write!(f, "begin-integration"),
            PhaseEvent::RaiseChangeRequest => write!(f, "raise-change-request"),
            PhaseEvent::ReportBug => write!(f, "report-bug"),
            PhaseEvent::AwaitDecision(p) => write!(f, "await-decision({})", p),
            PhaseEvent::Resume(p) => write!(f, "resume({})", p),
            PhaseEvent::Pause => write!(f, "pause"),
            PhaseEvent::Abandon => write!(f, "abandon"),
        }
    }
}

impl std::str::FromStr for PhaseEvent {
    type Err = anyhow::Error;

    /// Parses the events a user may issue directly. Checkpoint-driven events
    /// (`await-decision`, `resume`) are raised by the engine only.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "start" => Ok(PhaseEvent::Start),
            "work-completed" | "complete" | "done" => Ok(PhaseEvent::WorkCompleted),
            "skip" => Ok(PhaseEvent::Skip),
            "begin-integration" | "integrate" => Ok(PhaseEvent::BeginIntegration),
            "raise-change-request" | "change-request" => Ok(PhaseEvent::RaiseChangeRequest),
            "report-bug" | "bug" => Ok(PhaseEvent::ReportBug),
            "pause" => Ok(PhaseEvent::Pause),
            "abandon" => Ok(PhaseEvent::Abandon),
            _ => anyhow::bail!(
                "Invalid event '{}'. Valid values: start, complete, skip, integrate, change-request, report-bug, pause, abandon",
                s
            ),
        }
    }
}

impl Phase {
    pub const ALL: [Phase; 23] = [
        Phase::Idle,
        Phase::EnvironmentSetup,
        Phase::SpecElaboration,
        Phase::UxUiDesign,
        Phase::TechnicalSpecification,
        Phase::BuildScriptSetup,
        Phase::TestEnvironmentSetup,
        Phase::CodingStandardGeneration,
        Phase::Planning,
        Phase::Development,
        Phase::PlanComplete,
        Phase::IntegrationAndVerification,
        Phase::ManualUiTesting,
        Phase::Completed,
        Phase::RaisingChangeRequest,
        Phase::ReportingOperationalBug,
        Phase::AwaitingManualGate,
        Phase::AwaitingIntegrationConfirmation,
        Phase::AwaitingPreflightResolution,
        Phase::DebugEscalation,
        Phase::Paused,
        Phase::ViewingProjectHistory,
        Phase::EditingChangeRequest,
    ];

    /// Stable machine name, used for persistence and the CLI.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::EnvironmentSetup => "environment-setup",
            Phase::SpecElaboration => "spec-elaboration",
            Phase::UxUiDesign => "ux-ui-design",
            Phase::TechnicalSpecification => "technical-specification",
            Phase::BuildScriptSetup => "build-script-setup",
            Phase::TestEnvironmentSetup => "test-environment-setup",
            Phase::CodingStandardGeneration => "coding-standard-generation",
            Phase::Planning => "planning",
            Phase::Development => "development",
            Phase::PlanComplete => "plan-complete",
            Phase::IntegrationAndVerification => "integration-and-verification",
            Phase::ManualUiTesting => "manual-ui-testing",
            Phase::Completed => "completed",
            Phase::RaisingChangeRequest => "raising-change-request",
            Phase::ReportingOperationalBug => "reporting-operational-bug",
            Phase::AwaitingManualGate => "awaiting-manual-gate",
            Phase::AwaitingIntegrationConfirmation => "awaiting-integration-confirmation",
            Phase::AwaitingPreflightResolution => "awaiting-preflight-resolution",
            Phase::DebugEscalation => "debug-escalation",
            Phase::Paused => "paused",
            Phase::ViewingProjectHistory => "viewing-project-history",
            Phase::EditingChangeRequest => "editing-change-request",
        }
    }

    /// Human-readable name for status output.
    pub fn display_name(self) -> &'static str {
        match self {
            Phase::Idle => "Idle",
            Phase::EnvironmentSetup => "Environment Setup",
            Phase::SpecElaboration => "Specification Elaboration",
            Phase::UxUiDesign => "UX/UI Design",
            Phase::TechnicalSpecification => "Technical Specification",
            Phase::BuildScriptSetup => "Build Script Setup",
            Phase::TestEnvironmentSetup => "Test Environment Setup",
            Phase::CodingStandardGeneration => "Coding Standard Generation",
            Phase::Planning => "Development Planning",
            Phase::Development => "Development",
            Phase::PlanComplete => "Development Plan Complete",
            Phase::IntegrationAndVerification => "Integration & Verification",
            Phase::ManualUiTesting => "Manual UI Testing",
            Phase::Completed => "Completed",
            Phase::RaisingChangeRequest => "Raising Change Request",
            Phase::ReportingOperationalBug => "Reporting Operational Bug",
            Phase::AwaitingManualGate => "Awaiting Manual Gate",
            Phase::AwaitingIntegrationConfirmation => "Awaiting Integration Confirmation",
            Phase::AwaitingPreflightResolution => "Awaiting Preflight Resolution",
            Phase::DebugEscalation => "Debug Escalation",
            Phase::Paused => "Paused",
            Phase::ViewingProjectHistory => "Viewing Project History",
            Phase::EditingChangeRequest => "Editing Change Request",
        }
    }

    /// Auxiliary phases are detours: visible, but never persisted.
    pub fn is_auxiliary(self) -> bool {
        matches!(
            self,
            Phase::ViewingProjectHistory | Phase::EditingChangeRequest
        )
    }

    /// Phases entered only while a checkpoint is outstanding.
    pub fn is_awaiting(self) -> bool {
        matches!(
            self,
            Phase::AwaitingManualGate
                | Phase::AwaitingIntegrationConfirmation
                | Phase::AwaitingPreflightResolution
                | Phase::DebugEscalation
        )
    }

    /// Phases that may be bypassed with `skip`.
    pub fn is_optional(self) -> bool {
        matches!(
            self,
            Phase::UxUiDesign | Phase::BuildScriptSetup | Phase::TestEnvironmentSetup
        )
    }

    /// Phases whose work is a single phase-level operation run by the executor.
    pub fn runs_operation(self) -> bool {
        matches!(
            self,
            Phase::EnvironmentSetup
                | Phase::SpecElaboration
                | Phase::UxUiDesign
                | Phase::TechnicalSpecification
                | Phase::BuildScriptSetup
                | Phase::TestEnvironmentSetup
                | Phase::CodingStandardGeneration
                | Phase::Planning
                | Phase::IntegrationAndVerification
                | Phase::RaisingChangeRequest
                | Phase::ReportingOperationalBug
        )
    }

    /// Phase operations whose output is a fresh development plan.
    pub fn produces_plan(self) -> bool {
        matches!(
            self,
            Phase::Planning | Phase::RaisingChangeRequest | Phase::ReportingOperationalBug
        )
    }

    /// Operational phases are the ones a project can rest in and resume into.
    pub fn is_operational(self) -> bool {
        !self.is_auxiliary() && !self.is_awaiting() && self != Phase::Paused
    }

    /// Whether the working tree is expected to exist and be under version
    /// control in this phase.
    pub fn has_working_tree(self) -> bool {
        !matches!(self, Phase::Idle | Phase::EnvironmentSetup)
    }

    fn accepts_change_requests(self) -> bool {
        matches!(
            self,
            Phase::Development
                | Phase::PlanComplete
                | Phase::IntegrationAndVerification
                | Phase::ManualUiTesting
                | Phase::Completed
        )
    }

    /// The transition table. `None` means the event is rejected in this phase.
    pub fn next(self, event: PhaseEvent) -> Option<Phase> {
        use Phase::*;
        use PhaseEvent as E;

        match (self, event) {
            (_, E::Abandon) if self.is_auxiliary() || self == Idle => None,
            (_, E::Abandon) => Some(Idle),

            (Paused, E::Pause) => None,
            (Idle | Completed, E::Pause) => None,
            (p, E::Pause) if p.is_auxiliary() => None,
            (_, E::Pause) => Some(Paused),

            (p, E::AwaitDecision(target)) => {
                (target.is_awaiting() && p != Idle && !p.is_auxiliary() && !p.is_awaiting())
                    .then_some(target)
            }
            (p, E::Resume(target)) => {
                ((p.is_awaiting() || p == Paused) && target.is_operational()).then_some(target)
            }

            (Idle, E::Start) => Some(EnvironmentSetup),
            (EnvironmentSetup, E::WorkCompleted) => Some(SpecElaboration),
            (SpecElaboration, E::WorkCompleted) => Some(UxUiDesign),
            (UxUiDesign, E::WorkCompleted | E::Skip) => Some(TechnicalSpecification),
            (TechnicalSpecification, E::WorkCompleted) => Some(BuildScriptSetup),
            (BuildScriptSetup, E::WorkCompleted | E::Skip) => Some(TestEnvironmentSetup),
            (TestEnvironmentSetup, E::WorkCompleted | E::Skip) => Some(CodingStandardGeneration),
            (CodingStandardGeneration, E::WorkCompleted) => Some(Planning),
            (Planning, E::WorkCompleted | E::PlanLoaded) => Some(Development),
            (Development, E::PlanLoaded) => Some(Development),
            (Development, E::PlanExhausted) => Some(PlanComplete),
            (PlanComplete, E::PlanLoaded) => Some(Development),
            (PlanComplete, E::BeginIntegration) => Some(IntegrationAndVerification),
            (IntegrationAndVerification, E::WorkCompleted) => Some(ManualUiTesting),
            (ManualUiTesting, E::WorkCompleted) => Some(Completed),

            (p, E::RaiseChangeRequest) if p.accepts_change_requests() => {
                Some(RaisingChangeRequest)
            }
            (p, E::ReportBug) if p.accepts_change_requests() => Some(ReportingOperationalBug),
            (
                RaisingChangeRequest | ReportingOperationalBug,
                E::WorkCompleted | E::PlanLoaded,
            ) => Some(Development),

            _ => None,
        }
    }

    /// Like [`Phase::next`], but as a typed error.
    pub fn transition(self, event: PhaseEvent) -> Result<Phase, OrchestratorError> {
        self.next(event)
            .ok_or_else(|| OrchestratorError::TransitionRejected {
                from: self,
                event: event.to_string(),
            })
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Phase {
    type Err = OrchestratorError;

    /// Accepts kebab-case, snake_case and SCREAMING_SNAKE names, plus the
    /// legacy aliases older state files used.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = normalize(s);
        if let Some(phase) = Phase::ALL.iter().find(|p| p.as_str() == name) {
            return Ok(*phase);
        }
        match name.as_str() {
            "env-setup-target-app" => Ok(Phase::EnvironmentSetup),
            "genesis" => Ok(Phase::Development),
            "awaiting-pm-declarative-checkpoint" => Ok(Phase::AwaitingManualGate),
            "debug-pm-escalation" => Ok(Phase::DebugEscalation),
            "integration" => Ok(Phase::IntegrationAndVerification),
            _ => Err(OrchestratorError::InvalidPhase(s.to_string())),
        }
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase().replace(['_', ' '], "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELIVERY_PATH: [Phase; 9] = [
        Phase::EnvironmentSetup,
        Phase::SpecElaboration,
        Phase::UxUiDesign,
        Phase::TechnicalSpecification,
        Phase::BuildScriptSetup,
        Phase::TestEnvironmentSetup,
        Phase::CodingStandardGeneration,
        Phase::Planning,
        Phase::Development,
    ];

    #[test]
    fn test_linear_path_via_work_completed() {
        let mut phase = Phase::Idle.next(PhaseEvent::Start).unwrap();
        assert_eq!(phase, Phase::EnvironmentSetup);
        for expected in DELIVERY_PATH.iter().skip(1) {
            phase = phase.next(PhaseEvent::WorkCompleted).unwrap();
            assert_eq!(phase, *expected);
        }
        phase = phase.next(PhaseEvent::PlanExhausted).unwrap();
        assert_eq!(phase, Phase::PlanComplete);
        phase = phase.next(PhaseEvent::BeginIntegration).unwrap();
        assert_eq!(phase, Phase::IntegrationAndVerification);
        phase = phase.next(PhaseEvent::WorkCompleted).unwrap();
        assert_eq!(phase, Phase::ManualUiTesting);
        phase = phase.next(PhaseEvent::WorkCompleted).unwrap();
        assert_eq!(phase, Phase::Completed);
    }

    #[test]
    fn test_skip_only_for_optional_phases() {
        assert_eq!(
            Phase::UxUiDesign.next(PhaseEvent::Skip),
            Some(Phase::TechnicalSpecification)
        );
        assert_eq!(
            Phase::BuildScriptSetup.next(PhaseEvent::Skip),
            Some(Phase::TestEnvironmentSetup)
        );
        assert_eq!(Phase::SpecElaboration.next(PhaseEvent::Skip), None);
        assert_eq!(Phase::Planning.next(PhaseEvent::Skip), None);
    }

    #[test]
    fn test_development_does_not_accept_work_completed() {
        assert_eq!(Phase::Development.next(PhaseEvent::WorkCompleted), None);
    }

    #[test]
    fn test_change_requests_lead_back_to_development() {
        let cr = Phase::Completed
            .next(PhaseEvent::RaiseChangeRequest)
            .unwrap();
        assert_eq!(cr, Phase::RaisingChangeRequest);
        assert_eq!(cr.next(PhaseEvent::WorkCompleted), Some(Phase::Development));
        assert_eq!(
            Phase::ManualUiTesting.next(PhaseEvent::ReportBug),
            Some(Phase::ReportingOperationalBug)
        );
        assert_eq!(Phase::Planning.next(PhaseEvent::RaiseChangeRequest), None);
    }

    #[test]
    fn test_await_decision_requires_awaiting_target() {
        assert_eq!(
            Phase::Development.next(PhaseEvent::AwaitDecision(Phase::DebugEscalation)),
            Some(Phase::DebugEscalation)
        );
        assert_eq!(
            Phase::Development.next(PhaseEvent::AwaitDecision(Phase::Planning)),
            None
        );
        // No nesting of checkpoints.
        assert_eq!(
            Phase::DebugEscalation.next(PhaseEvent::AwaitDecision(Phase::AwaitingManualGate)),
            None
        );
        assert_eq!(
            Phase::Paused.next(PhaseEvent::AwaitDecision(Phase::AwaitingPreflightResolution)),
            Some(Phase::AwaitingPreflightResolution)
        );
    }

    #[test]
    fn test_resume_only_from_awaiting_or_paused() {
        assert_eq!(
            Phase::Paused.next(PhaseEvent::Resume(Phase::Development)),
            Some(Phase::Development)
        );
        assert_eq!(
            Phase::DebugEscalation.next(PhaseEvent::Resume(Phase::Development)),
            Some(Phase::Development)
        );
        assert_eq!(Phase::Development.next(PhaseEvent::Resume(Phase::Planning)), None);
        assert_eq!(
            Phase::Paused.next(PhaseEvent::Resume(Phase::DebugEscalation)),
            None
        );
    }

    #[test]
    fn test_pause_and_abandon() {
        assert_eq!(Phase::Development.next(PhaseEvent::Pause), Some(Phase::Paused));
        assert_eq!(Phase::DebugEscalation.next(PhaseEvent::Pause), Some(Phase::Paused));
        assert_eq!(Phase::Idle.next(PhaseEvent::Pause), None);
        assert_eq!(Phase::Paused.next(PhaseEvent::Pause), None);
        assert_eq!(Phase::Planning.next(PhaseEvent::Abandon), Some(Phase::Idle));
        assert_eq!(Phase::Idle.next(PhaseEvent::Abandon), None);
    }

    #[test]
    fn test_transition_returns_typed_error() {
        let err = Phase::Completed.transition(PhaseEvent::Start).unwrap_err();
        match err {
            OrchestratorError::TransitionRejected { from, event } => {
                assert_eq!(from, Phase::Completed);
                assert_eq!(event, "start");
            }
            other => panic!("Expected TransitionRejected, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_accepts_all_spellings() {
        assert_eq!("development".parse::<Phase>().unwrap(), Phase::Development);
        assert_eq!("PLAN_COMPLETE".parse::<Phase>().unwrap(), Phase::PlanComplete);
        assert_eq!("ux_ui_design".parse::<Phase>().unwrap(), Phase::UxUiDesign);
        assert_eq!("GENESIS".parse::<Phase>().unwrap(), Phase::Development);
        for phase in Phase::ALL {
            assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
        }
    }

    #[test]
    fn test_parse_rejects_unknown_name() {
        let err = "warp-speed".parse::<Phase>().unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidPhase(name) if name == "warp-speed"));
    }

    #[test]
    fn test_serde_matches_as_str() {
        for phase in Phase::ALL {
            let json = serde_json::to_string(&phase).unwrap();
            assert_eq!(json, format!("\"{}\"", phase.as_str()));
        }
    }

    #[test]
    fn test_classification_is_consistent() {
        for phase in Phase::ALL {
            if phase.is_auxiliary() || phase.is_awaiting() {
                assert!(!phase.is_operational(), "{phase} should not be operational");
                assert!(!phase.runs_operation(), "{phase} should not run operations");
            }
            if phase.produces_plan() {
                assert!(phase.runs_operation());
            }
        }
    }

    #[test]
    fn test_event_parsing() {
        assert_eq!("complete".parse::<PhaseEvent>().unwrap(), PhaseEvent::WorkCompleted);
        assert_eq!("report_bug".parse::<PhaseEvent>().unwrap(), PhaseEvent::ReportBug);
        assert!("resume".parse::<PhaseEvent>().is_err());
    }
}
