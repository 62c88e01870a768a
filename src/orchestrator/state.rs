use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::checkpoint::CheckpointRequest;
use crate::coordinator::{TaskEvent, TaskHandle};
use crate::escalation::RetryState;
use crate::executor::WorkUnit;
use crate::phase::Phase;
use crate::plan::{Plan, Task};

/// Durable state of one project.
///
/// Only the orchestrator mutates it, and every mutation is saved before it
/// becomes visible. Invariants: the plan cursor never exceeds the plan
/// length, and at most one checkpoint is outstanding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub id: String,
    pub name: String,
    pub root_folder: PathBuf,
    /// Last stable operational (or awaiting) phase. Never auxiliary.
    pub phase: Phase,
    #[serde(default)]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub checkpoint: Option<CheckpointRequest>,
    /// Work items logged when failing tasks were skipped.
    #[serde(default)]
    pub backlog: Vec<Task>,
    /// Phase to return to when leaving `paused`.
    #[serde(default)]
    pub paused_from: Option<Phase>,
    /// Checkpoint set aside while a preflight checkpoint is resolved first.
    #[serde(default)]
    pub deferred_checkpoint: Option<CheckpointRequest>,
    /// Working-tree HEAD recorded after the last completed unit, pause,
    /// export or reconciliation.
    #[serde(default)]
    pub expected_head: Option<String>,
    pub updated_at: DateTime<Utc>,
    /// Set while the session shows an unsaved detour phase.
    #[serde(skip)]
    pub dirty: bool,
}

impl ProjectState {
    pub fn new(name: &str, root_folder: &Path) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            root_folder: root_folder.to_path_buf(),
            phase: Phase::Idle,
            plan: None,
            checkpoint: None,
            backlog: Vec::new(),
            paused_from: None,
            deferred_checkpoint: None,
            expected_head: None,
            updated_at: Utc::now(),
            dirty: false,
        }
    }

    pub fn cursor(&self) -> usize {
        self.plan.as_ref().map(|p| p.cursor()).unwrap_or(0)
    }

    pub fn current_task(&self) -> Option<&Task> {
        self.plan.as_ref().and_then(|p| p.current())
    }

    /// Phase the project continues in once paused or awaiting states clear.
    pub fn operational_phase(&self) -> Phase {
        match &self.checkpoint {
            Some(request) => request.resume_phase,
            None => self.paused_from.unwrap_or(self.phase),
        }
    }
}

pub(crate) struct InFlight {
    pub unit: WorkUnit,
    pub handle: TaskHandle,
}

/// Live, in-memory handle on one project, owned by the control context.
///
/// Holds the durable [`ProjectState`] plus everything that must not be
/// persisted: the detour phase, retry bookkeeping, the in-flight submission
/// and the channel its events arrive on.
pub struct ProjectSession {
    pub(crate) state: ProjectState,
    pub(crate) detour: Option<Phase>,
    pub(crate) retry: RetryState,
    pub(crate) in_flight: Option<InFlight>,
    pub(crate) events_tx: mpsc::Sender<TaskEvent>,
    pub(crate) events_rx: mpsc::Receiver<TaskEvent>,
    observer: Option<Box<dyn Fn(&TaskEvent) + Send + Sync>>,
}

impl ProjectSession {
    pub(crate) fn new(state: ProjectState, event_buffer: usize) -> Self {
        let (events_tx, events_rx) = mpsc::channel(event_buffer.max(1));
        Self {
            state,
            detour: None,
            retry: RetryState::default(),
            in_flight: None,
            events_tx,
            events_rx,
            observer: None,
        }
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn project_id(&self) -> &str {
        &self.state.id
    }

    /// The visible phase: the detour if one is active, else the durable phase.
    pub fn phase(&self) -> Phase {
        self.detour.unwrap_or(self.state.phase)
    }

    pub fn durable_phase(&self) -> Phase {
        self.state.phase
    }

    pub fn detour(&self) -> Option<Phase> {
        self.detour
    }

    pub fn checkpoint(&self) -> Option<&CheckpointRequest> {
        self.state.checkpoint.as_ref()
    }

    pub fn is_running(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight_unit(&self) -> Option<&WorkUnit> {
        self.in_flight.as_ref().map(|f| &f.unit)
    }

    pub fn retry_state(&self) -> &RetryState {
        &self.retry
    }

    /// Register a callback invoked for every accepted task event.
    pub fn on_event<F>(&mut self, observer: F)
    where
        F: Fn(&TaskEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub(crate) fn notify(&self, event: &TaskEvent) {
        if let Some(observer) = &self.observer {
            observer(event);
        }
    }
}

impl std::fmt::Debug for ProjectSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectSession")
            .field("project", &self.state.id)
            .field("phase", &self.phase())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Checkpoint;

    #[test]
    fn test_new_state_starts_idle() {
        let state = ProjectState::new("demo", Path::new("/tmp/demo"));
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.cursor(), 0);
        assert!(state.current_task().is_none());
        assert!(Uuid::parse_str(&state.id).is_ok());
    }

    #[test]
    fn test_json_roundtrip_skips_dirty() {
        let mut state = ProjectState::new("demo", Path::new("/tmp/demo"));
        state.phase = Phase::Development;
        state.plan = Some(Plan::new(vec![Task::new("T-1", "a", "")]));
        state.dirty = true;

        let json = serde_json::to_string(&state).unwrap();
        assert!(!json.contains("dirty"));
        let back: ProjectState = serde_json::from_str(&json).unwrap();
        assert!(!back.dirty);
        assert_eq!(back.plan, state.plan);
        assert_eq!(back.updated_at, state.updated_at);
    }

    #[test]
    fn test_operational_phase_prefers_checkpoint_then_pause() {
        let mut state = ProjectState::new("demo", Path::new("/tmp/demo"));
        state.phase = Phase::Paused;
        state.paused_from = Some(Phase::Development);
        assert_eq!(state.operational_phase(), Phase::Development);

        state.phase = Phase::AwaitingPreflightResolution;
        state.checkpoint = Some(CheckpointRequest::new(
            Checkpoint::StateDrift {
                summary: "x".into(),
            },
            Phase::Planning,
        ));
        assert_eq!(state.operational_phase(), Phase::Planning);
    }

    #[test]
    fn test_session_visible_phase_follows_detour() {
        let state = ProjectState::new("demo", Path::new("/tmp/demo"));
        let mut session = ProjectSession::new(state, 8);
        assert_eq!(session.phase(), Phase::Idle);
        session.detour = Some(Phase::ViewingProjectHistory);
        assert_eq!(session.phase(), Phase::ViewingProjectHistory);
        assert_eq!(session.durable_phase(), Phase::Idle);
    }
}
