use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, info, warn};

use super::state::{InFlight, ProjectSession, ProjectState};
use crate::checkpoint::{self, Checkpoint, CheckpointRequest, Decision};
use crate::coordinator::{TaskCoordinator, TaskEventKind, TaskOutput, TaskResult};
use crate::errors::{OrchestratorError, TaskFailure};
use crate::escalation::{EscalationOutcome, EscalationPolicy};
use crate::executor::{TaskExecutor, WorkRequest, WorkUnit};
use crate::phase::{Phase, PhaseEvent};
use crate::plan::{Plan, Task, TaskStatus};
use crate::preflight;
use crate::store::{ProjectHistoryRecord, ProjectSummary, StateStore};
use crate::tracker::Workspace;

/// Commit message used when external changes are adopted at preflight.
const ADOPT_CHANGES_MESSAGE: &str = "waypoint: adopt external changes";

/// Tunables for an [`Orchestrator`].
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub policy: EscalationPolicy,
    /// Submit the next plan task automatically after one succeeds.
    pub auto_proceed: bool,
    pub max_workers: usize,
    pub event_buffer: usize,
    pub archive_dir: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            policy: EscalationPolicy::default(),
            auto_proceed: false,
            max_workers: 4,
            event_buffer: 64,
            archive_dir: PathBuf::from(".waypoint/archive"),
        }
    }
}

/// What a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// A unit of work is now running in the background.
    Submitted(WorkUnit),
    /// The project moved to a new phase without running work.
    Advanced(Phase),
    CheckpointRaised(CheckpointRequest),
    Paused,
    /// The project was released back to the project list.
    Closed,
}

/// Where [`Orchestrator::drive`] stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum DriveOutcome {
    /// Nothing is running and no decision is pending.
    Settled(Phase),
    AwaitingDecision(CheckpointRequest),
    Cancelled(Phase),
}

/// The single decision authority over project state.
///
/// Holds only shared collaborators; per-project state lives in the
/// [`ProjectSession`] passed to each command, so sessions for different
/// projects may be driven concurrently from one orchestrator. Every durable
/// change is built on a copy of the state, saved, and only then installed.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    executor: Arc<dyn TaskExecutor>,
    workspace: Arc<dyn Workspace>,
    coordinator: TaskCoordinator,
    settings: EngineSettings,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        executor: Arc<dyn TaskExecutor>,
        workspace: Arc<dyn Workspace>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            executor,
            workspace,
            coordinator: TaskCoordinator::new(settings.max_workers),
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ── Projects ──────────────────────────────────────────────────────

    /// Create a project in `idle` and make it the active project.
    pub fn start_project(
        &self,
        name: &str,
        root: &Path,
    ) -> Result<ProjectSession, OrchestratorError> {
        let state = ProjectState::new(name, root);
        self.store.save_state(&state)?;
        self.store.set_active_project(Some(&state.id))?;
        info!(project = %state.id, name, root = %root.display(), "project created");
        Ok(ProjectSession::new(state, self.settings.event_buffer))
    }

    /// Load a project without reconciling it.
    pub fn open(&self, project_id: &str) -> Result<ProjectSession, OrchestratorError> {
        let state = self
            .store
            .load_state(project_id)?
            .ok_or_else(|| OrchestratorError::ProjectNotFound {
                id: project_id.to_string(),
            })?;
        Ok(ProjectSession::new(state, self.settings.event_buffer))
    }

    pub fn open_active(&self) -> Result<ProjectSession, OrchestratorError> {
        let id = self
            .store
            .active_project()?
            .ok_or(OrchestratorError::NoActiveProject)?;
        self.open(&id)
    }

    pub fn list_projects(&self) -> Result<Vec<ProjectSummary>, OrchestratorError> {
        Ok(self.store.list_projects()?)
    }

    pub fn list_history(&self) -> Result<Vec<ProjectHistoryRecord>, OrchestratorError> {
        Ok(self.store.list_history()?)
    }

    /// Delete a history record along with its exported snapshot file.
    pub fn delete_history(&self, history_id: i64) -> Result<(), OrchestratorError> {
        let record = self
            .store
            .load_history(history_id)?
            .ok_or(OrchestratorError::HistoryNotFound { id: history_id })?;
        if let Some(path) = &record.archive_path {
            match std::fs::remove_file(path) {
                Ok(()) => debug!(history_id, path = %path.display(), "archive file removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!(history_id, path = %path.display(), "archive file already missing")
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e)
                        .context(format!("Failed to remove archive: {}", path.display()))
                        .into());
                }
            }
        }
        if !self.store.delete_history(history_id)? {
            return Err(OrchestratorError::HistoryNotFound { id: history_id });
        }
        info!(history_id, "history record deleted");
        Ok(())
    }

    // ── Phase commands ────────────────────────────────────────────────

    /// Jump directly to a named phase.
    ///
    /// Auxiliary phases only set the visible detour. Awaiting phases cannot
    /// be entered by name since they belong to checkpoints.
    pub fn set_phase(
        &self,
        session: &mut ProjectSession,
        name: &str,
    ) -> Result<Phase, OrchestratorError> {
        let target: Phase = name.parse()?;
        Self::ensure_idle(session)?;

        if target.is_auxiliary() {
            session.detour = Some(target);
            session.state.dirty = true;
            info!(project = %session.state.id, detour = %target, "entered detour");
            return Ok(target);
        }
        if let Some(request) = &session.state.checkpoint {
            return Err(OrchestratorError::AwaitingDecision {
                kind: request.checkpoint.kind().to_string(),
            });
        }
        if target.is_awaiting() {
            return Err(OrchestratorError::TransitionRejected {
                from: session.state.phase,
                event: format!("set-phase({})", target),
            });
        }

        let from = session.state.phase;
        self.commit(session, |state| {
            state.paused_from = (target == Phase::Paused).then(|| state.operational_phase());
            state.deferred_checkpoint = None;
            state.phase = target;
            Ok(())
        })?;
        session.detour = None;
        session.state.dirty = false;
        session.retry.reset();
        info!(project = %session.state.id, %from, to = %target, "phase set");
        Ok(target)
    }

    /// Leave an auxiliary detour and show the durable phase again.
    pub fn return_from_detour(&self, session: &mut ProjectSession) -> Phase {
        if let Some(detour) = session.detour.take() {
            debug!(project = %session.state.id, %detour, "left detour");
        }
        session.state.dirty = false;
        session.state.phase
    }

    /// Apply a user-issued event to the visible phase.
    pub fn transition(
        &self,
        session: &mut ProjectSession,
        event: PhaseEvent,
    ) -> Result<Phase, OrchestratorError> {
        Self::ensure_idle(session)?;
        let from = session.phase();
        if matches!(event, PhaseEvent::AwaitDecision(_) | PhaseEvent::Resume(_)) {
            return Err(OrchestratorError::TransitionRejected {
                from,
                event: event.to_string(),
            });
        }
        if event != PhaseEvent::Abandon
            && let Some(request) = &session.state.checkpoint
        {
            return Err(OrchestratorError::AwaitingDecision {
                kind: request.checkpoint.kind().to_string(),
            });
        }

        let next = from.transition(event)?;
        self.commit(session, |state| {
            match event {
                PhaseEvent::Abandon => {
                    state.plan = None;
                    state.checkpoint = None;
                    state.deferred_checkpoint = None;
                    state.paused_from = None;
                }
                PhaseEvent::Pause => state.paused_from = Some(from),
                _ => {}
            }
            state.phase = next;
            Ok(())
        })?;
        session.retry.reset();
        info!(project = %session.state.id, %from, %event, to = %next, "transition");
        Ok(next)
    }

    /// Install a development plan, replacing any existing one.
    pub fn load_plan(
        &self,
        session: &mut ProjectSession,
        tasks: Vec<Task>,
    ) -> Result<Phase, OrchestratorError> {
        Self::ensure_ready(session)?;
        if tasks.is_empty() {
            return Err(OrchestratorError::EmptyPlan);
        }
        let count = tasks.len();
        let next = session.state.phase.transition(PhaseEvent::PlanLoaded)?;
        self.commit(session, |state| {
            Self::install_plan(state, tasks);
            state.phase = next;
            Ok(())
        })?;
        session.retry.reset();
        info!(project = %session.state.id, tasks = count, "plan loaded");
        Ok(next)
    }

    // ── Execution ─────────────────────────────────────────────────────

    /// Start the next unit of work for the current phase, or take the
    /// phase's non-executing step. Returns as soon as work is submitted.
    pub fn proceed(
        &self,
        session: &mut ProjectSession,
    ) -> Result<CommandOutcome, OrchestratorError> {
        Self::ensure_ready(session)?;
        let phase = session.state.phase;

        match phase {
            Phase::Idle => self.advance(session, PhaseEvent::Start),
            Phase::Development => match session.state.current_task().cloned() {
                None => self.advance(session, PhaseEvent::PlanExhausted),
                Some(task) if task.requires_approval => {
                    let request = self.raise(
                        session,
                        Checkpoint::ManualGate {
                            task_id: task.id.clone(),
                            description: task.description.clone(),
                        },
                        Phase::Development,
                    )?;
                    Ok(CommandOutcome::CheckpointRaised(request))
                }
                Some(task) => self.submit(session, WorkUnit::task(task)),
            },
            Phase::PlanComplete if !session.state.backlog.is_empty() => {
                let known_issues = session
                    .state
                    .backlog
                    .iter()
                    .map(|t| t.description.clone())
                    .collect();
                let request = self.raise(
                    session,
                    Checkpoint::IntegrationConfirmation { known_issues },
                    Phase::PlanComplete,
                )?;
                Ok(CommandOutcome::CheckpointRaised(request))
            }
            Phase::PlanComplete => self.advance(session, PhaseEvent::BeginIntegration),
            Phase::ManualUiTesting => self.advance(session, PhaseEvent::WorkCompleted),
            p if p.runs_operation() => self.submit(session, WorkUnit::phase(p)),
            p => Err(OrchestratorError::NothingToProceed { phase: p }),
        }
    }

    /// Consume task events until nothing is running or a decision is needed.
    ///
    /// Applies terminal results (advance and persist, retry, escalate) and,
    /// with `auto_proceed`, keeps submitting plan tasks during development.
    /// Events from superseded submissions are ignored.
    pub async fn drive(
        &self,
        session: &mut ProjectSession,
    ) -> Result<DriveOutcome, OrchestratorError> {
        loop {
            let Some(current) = session
                .in_flight
                .as_ref()
                .map(|f| f.handle.submission_id())
            else {
                if let Some(request) = &session.state.checkpoint {
                    return Ok(DriveOutcome::AwaitingDecision(request.clone()));
                }
                if self.settings.auto_proceed && session.state.phase == Phase::Development {
                    self.proceed(session)?;
                    continue;
                }
                return Ok(DriveOutcome::Settled(session.phase()));
            };

            let event = session
                .events_rx
                .recv()
                .await
                .context("Task event channel closed")?;
            if event.submission_id != current {
                debug!(submission = %event.submission_id, "ignoring stale task event");
                continue;
            }
            session.notify(&event);

            match event.kind {
                TaskEventKind::Progress { status, .. } => {
                    debug!(project = %session.state.id, %status, "task progress");
                }
                TaskEventKind::Finished { result } => {
                    let Some(flight) = session.in_flight.take() else {
                        continue;
                    };
                    match result {
                        TaskResult::Succeeded { output } => {
                            self.on_success(session, flight.unit, output).await?
                        }
                        TaskResult::Failed { failure } => {
                            self.on_failure(session, flight.unit, failure).await?
                        }
                        TaskResult::Cancelled => {
                            info!(project = %session.state.id, unit = %flight.unit.label(), "task cancelled");
                            return Ok(DriveOutcome::Cancelled(session.phase()));
                        }
                    }
                }
            }
        }
    }

    /// Request cooperative cancellation of the in-flight unit, if any.
    pub fn cancel(&self, session: &ProjectSession) -> bool {
        match &session.in_flight {
            Some(flight) => {
                flight.handle.cancel();
                info!(project = %session.state.id, unit = %flight.unit.label(), "cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Stop in-flight work and persist the project as paused.
    ///
    /// The result of a cancelled unit is discarded; the unit runs again when
    /// the project proceeds after resuming. An outstanding checkpoint stays
    /// outstanding.
    pub async fn pause(
        &self,
        session: &mut ProjectSession,
    ) -> Result<CommandOutcome, OrchestratorError> {
        if let Some(flight) = session.in_flight.take() {
            flight.handle.cancel();
            let result = flight.handle.join().await;
            debug!(project = %session.state.id, ?result, "in-flight unit stopped for pause");
        }
        session.retry.reset();
        self.return_from_detour(session);

        if session.state.checkpoint.is_some() || session.state.phase == Phase::Paused {
            return Ok(CommandOutcome::Paused);
        }

        let from = session.state.phase;
        let next = from.transition(PhaseEvent::Pause)?;
        let head = self.observed_head(&session.state.root_folder);
        self.commit(session, |state| {
            state.paused_from = Some(from);
            state.expected_head = head;
            state.phase = next;
            Ok(())
        })?;
        info!(project = %session.state.id, %from, "project paused");
        Ok(CommandOutcome::Paused)
    }

    // ── Checkpoints ───────────────────────────────────────────────────

    /// Resolve the outstanding checkpoint with one of its offered options.
    ///
    /// An invalid decision leaves the checkpoint outstanding and the state
    /// untouched.
    pub fn resolve_checkpoint(
        &self,
        session: &mut ProjectSession,
        decision: Decision,
    ) -> Result<CommandOutcome, OrchestratorError> {
        Self::ensure_idle(session)?;
        let request = checkpoint::validate_decision(session.state.checkpoint.as_ref(), decision)?
            .clone();
        let resume = request.resume_phase;
        info!(
            project = %session.state.id,
            checkpoint = request.checkpoint.kind(),
            %decision,
            "resolving checkpoint"
        );

        match (request.checkpoint, decision) {
            (Checkpoint::DebugEscalation { unit, .. }, Decision::Retry) => {
                self.commit(session, |state| {
                    Self::clear_checkpoint(state)?;
                    if !unit.is_phase_level()
                        && let Some(plan) = state.plan.as_mut()
                    {
                        plan.mark_current(TaskStatus::Pending)?;
                    }
                    Ok(())
                })?;
                session.retry.reset();
                self.submit(session, unit)
            }
            (
                Checkpoint::DebugEscalation { .. }
                | Checkpoint::StateDrift { .. }
                | Checkpoint::IntegrationConfirmation { .. },
                Decision::Pause,
            ) => {
                let head = self.observed_head(&session.state.root_folder);
                self.commit(session, |state| {
                    state.checkpoint = None;
                    state.phase = state.phase.transition(PhaseEvent::Pause)?;
                    state.paused_from = Some(resume);
                    state.expected_head = head;
                    Ok(())
                })?;
                session.retry.reset();
                Ok(CommandOutcome::Paused)
            }
            (Checkpoint::DebugEscalation { unit, failure, .. }, Decision::Skip) => {
                let WorkUnit::PlanTask { task } = unit else {
                    return Err(OrchestratorError::InvalidDecision {
                        decision: decision.to_string(),
                        reason: "phase operations cannot be skipped".to_string(),
                    });
                };
                let follow_up = Task::follow_up(&task, &failure.to_string());
                let logged = follow_up.id.clone();
                self.commit(session, |state| {
                    Self::clear_checkpoint(state)?;
                    if let Some(plan) = state.plan.as_mut() {
                        plan.mark_current(TaskStatus::Skipped)?;
                    }
                    state.backlog.push(follow_up);
                    Self::advance_plan(state)
                })?;
                session.retry.reset();
                warn!(project = %session.state.id, task = %task.id, backlog = %logged, "task skipped");
                Ok(CommandOutcome::Advanced(session.state.phase))
            }
            (Checkpoint::StateDrift { .. }, Decision::ProceedIgnoringDrift) => {
                let head = self.observed_head(&session.state.root_folder);
                self.accept_working_tree(session, head)
            }
            (Checkpoint::StateDrift { .. }, Decision::CommitExternalChanges) => {
                let head = self.workspace.commit(
                    &session.state.root_folder,
                    &[],
                    ADOPT_CHANGES_MESSAGE,
                )?;
                self.accept_working_tree(session, Some(head))
            }
            (Checkpoint::StateDrift { .. }, Decision::DiscardExternalChanges) => {
                self.workspace.discard_all(&session.state.root_folder)?;
                let head = self.observed_head(&session.state.root_folder);
                self.accept_working_tree(session, head)
            }
            (Checkpoint::Unrecoverable { .. }, Decision::ReturnToProjectList) => {
                self.commit(session, |state| {
                    state.checkpoint = None;
                    state.phase = state.phase.transition(PhaseEvent::Pause)?;
                    state.paused_from = Some(resume);
                    Ok(())
                })?;
                if self.store.active_project()?.as_deref() == Some(session.project_id()) {
                    self.store.set_active_project(None)?;
                }
                Ok(CommandOutcome::Closed)
            }
            (Checkpoint::ManualGate { .. }, Decision::ExecuteAutomatically) => {
                self.commit(session, Self::clear_checkpoint)?;
                match session.state.current_task().cloned() {
                    Some(task) => self.submit(session, WorkUnit::task(task)),
                    None => Err(OrchestratorError::PlanExhausted),
                }
            }
            (Checkpoint::ManualGate { task_id, .. }, Decision::WillExecuteManually) => {
                self.commit(session, |state| {
                    Self::clear_checkpoint(state)?;
                    if let Some(plan) = state.plan.as_mut() {
                        plan.mark_current(TaskStatus::Done)?;
                    }
                    Self::advance_plan(state)
                })?;
                info!(project = %session.state.id, task = %task_id, "task executed manually");
                Ok(CommandOutcome::Advanced(session.state.phase))
            }
            (Checkpoint::IntegrationConfirmation { .. }, Decision::ProceedToIntegration) => {
                self.commit(session, |state| {
                    Self::clear_checkpoint(state)?;
                    state.phase = state.phase.transition(PhaseEvent::BeginIntegration)?;
                    Ok(())
                })?;
                Ok(CommandOutcome::Advanced(session.state.phase))
            }
            (checkpoint, decision) => Err(OrchestratorError::InvalidDecision {
                decision: decision.to_string(),
                reason: format!("not handled for {} checkpoints", checkpoint.kind()),
            }),
        }
    }

    // ── Resume & archive ──────────────────────────────────────────────

    /// Load a project, make it active and run preflight before anything
    /// else can be submitted.
    pub fn resume(&self, project_id: &str) -> Result<ProjectSession, OrchestratorError> {
        let mut session = self.open(project_id)?;
        self.store.set_active_project(Some(project_id))?;
        self.reenter(&mut session)?;
        Ok(session)
    }

    /// Restore an archived snapshot as the active project, then resume it.
    /// The history record is kept.
    pub fn resume_from_history(
        &self,
        history_id: i64,
    ) -> Result<ProjectSession, OrchestratorError> {
        let record = self
            .store
            .load_history(history_id)?
            .ok_or(OrchestratorError::HistoryNotFound { id: history_id })?;
        let mut state = record.snapshot;
        state.updated_at = Utc::now();
        self.store.save_state(&state)?;
        self.store.set_active_project(Some(&state.id))?;
        info!(history_id, project = %state.id, "restored project from history");

        let mut session = ProjectSession::new(state, self.settings.event_buffer);
        self.reenter(&mut session)?;
        Ok(session)
    }

    /// Write a JSON snapshot to the archive directory and move the project
    /// into history.
    pub fn export_and_archive(
        &self,
        session: ProjectSession,
        name: Option<&str>,
    ) -> Result<ProjectHistoryRecord, OrchestratorError> {
        Self::ensure_idle(&session)?;
        let mut snapshot = session.state;
        if snapshot.expected_head.is_none() {
            snapshot.expected_head = self.observed_head(&snapshot.root_folder);
        }
        snapshot.updated_at = Utc::now();

        let dir = &self.settings.archive_dir;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create archive dir: {}", dir.display()))?;
        let stem = sanitize(name.unwrap_or(&snapshot.name));
        let path = dir.join(format!(
            "{}-{}.json",
            stem,
            snapshot.updated_at.format("%Y%m%d%H%M%S")
        ));
        let json =
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize snapshot")?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write archive: {}", path.display()))?;

        let record = self.store.archive(&snapshot, Some(path))?;
        info!(
            project = %record.project_id,
            history_id = record.history_id,
            "project archived"
        );
        Ok(record)
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Save a mutated copy of the state, then install it.
    fn commit<F>(&self, session: &mut ProjectSession, mutate: F) -> Result<(), OrchestratorError>
    where
        F: FnOnce(&mut ProjectState) -> Result<(), OrchestratorError>,
    {
        let mut next = session.state.clone();
        mutate(&mut next)?;
        next.updated_at = Utc::now();
        self.store.save_state(&next)?;
        session.state = next;
        Ok(())
    }

    fn advance(
        &self,
        session: &mut ProjectSession,
        event: PhaseEvent,
    ) -> Result<CommandOutcome, OrchestratorError> {
        let from = session.state.phase;
        let next = from.transition(event)?;
        self.commit(session, |state| {
            state.phase = next;
            Ok(())
        })?;
        info!(project = %session.state.id, %from, %event, to = %next, "transition");
        Ok(CommandOutcome::Advanced(next))
    }

    fn raise(
        &self,
        session: &mut ProjectSession,
        checkpoint: Checkpoint,
        resume_phase: Phase,
    ) -> Result<CheckpointRequest, OrchestratorError> {
        checkpoint::ensure_clear(session.state.checkpoint.as_ref())?;
        let target = checkpoint.awaiting_phase();
        let next = session
            .state
            .phase
            .transition(PhaseEvent::AwaitDecision(target))?;
        let failed_task = matches!(
            &checkpoint,
            Checkpoint::DebugEscalation { unit, .. } if !unit.is_phase_level()
        );
        let request = CheckpointRequest::new(checkpoint, resume_phase);
        warn!(
            project = %session.state.id,
            checkpoint = request.checkpoint.kind(),
            "{}",
            request.checkpoint.headline()
        );

        let stored = request.clone();
        self.commit(session, |state| {
            if failed_task && let Some(plan) = state.plan.as_mut() {
                plan.mark_current(TaskStatus::Failed)?;
            }
            state.phase = next;
            state.checkpoint = Some(stored);
            Ok(())
        })?;
        Ok(request)
    }

    /// Drop the outstanding checkpoint and return to its resume phase.
    fn clear_checkpoint(state: &mut ProjectState) -> Result<(), OrchestratorError> {
        if let Some(request) = state.checkpoint.take() {
            state.phase = state
                .phase
                .transition(PhaseEvent::Resume(request.resume_phase))?;
            state.paused_from = None;
        }
        Ok(())
    }

    /// Replace the plan wholesale; the cursor starts over.
    fn install_plan(state: &mut ProjectState, tasks: Vec<Task>) {
        match state.plan.as_mut() {
            Some(plan) => plan.reset(tasks),
            None => state.plan = Some(Plan::new(tasks)),
        }
    }

    /// Move the cursor past the current task, leaving development once the
    /// plan is exhausted.
    fn advance_plan(state: &mut ProjectState) -> Result<(), OrchestratorError> {
        let plan = state.plan.as_mut().ok_or(OrchestratorError::PlanExhausted)?;
        plan.advance()?;
        if plan.is_complete() {
            state.phase = state.phase.transition(PhaseEvent::PlanExhausted)?;
        }
        Ok(())
    }

    fn accept_working_tree(
        &self,
        session: &mut ProjectSession,
        head: Option<String>,
    ) -> Result<CommandOutcome, OrchestratorError> {
        self.commit(session, |state| {
            Self::clear_checkpoint(state)?;
            state.expected_head = head;
            Self::restore_deferred(state)
        })?;
        match &session.state.checkpoint {
            Some(request) => {
                info!(
                    project = %session.state.id,
                    checkpoint = request.checkpoint.kind(),
                    "working tree accepted, checkpoint restored"
                );
                Ok(CommandOutcome::CheckpointRaised(request.clone()))
            }
            None => Ok(CommandOutcome::Advanced(session.state.phase)),
        }
    }

    /// Put back a checkpoint that preflight set aside, once nothing else is
    /// outstanding and the project is out of `paused`.
    fn restore_deferred(state: &mut ProjectState) -> Result<(), OrchestratorError> {
        if state.checkpoint.is_some() || state.phase == Phase::Paused {
            return Ok(());
        }
        if let Some(request) = state.deferred_checkpoint.take() {
            state.phase = state
                .phase
                .transition(PhaseEvent::AwaitDecision(request.checkpoint.awaiting_phase()))?;
            state.checkpoint = Some(request);
        }
        Ok(())
    }

    fn submit(
        &self,
        session: &mut ProjectSession,
        unit: WorkUnit,
    ) -> Result<CommandOutcome, OrchestratorError> {
        if session.is_running() {
            return Err(OrchestratorError::AlreadyRunning {
                project_id: session.state.id.clone(),
            });
        }
        let request = WorkRequest {
            project_id: session.state.id.clone(),
            project_name: session.state.name.clone(),
            root: session.state.root_folder.clone(),
            phase: session.state.phase,
            unit: unit.clone(),
        };
        let executor = self.executor.clone();
        let handle = self.coordinator.submit(
            &session.state.id,
            session.events_tx.clone(),
            move |ctx| async move { executor.execute(request, ctx).await },
        )?;
        info!(
            project = %session.state.id,
            submission = %handle.submission_id(),
            unit = %unit.label(),
            attempt = session.retry.attempts(),
            "submitted"
        );
        session.in_flight = Some(InFlight {
            unit: unit.clone(),
            handle,
        });
        Ok(CommandOutcome::Submitted(unit))
    }

    async fn on_success(
        &self,
        session: &mut ProjectSession,
        unit: WorkUnit,
        output: TaskOutput,
    ) -> Result<(), OrchestratorError> {
        match &unit {
            WorkUnit::PlanTask { task } => {
                if session.state.current_task().map(|t| &t.id) != Some(&task.id) {
                    warn!(task = %task.id, "completed task is no longer current, ignoring");
                    return Ok(());
                }
                session.retry.reset();
                let head = self.observed_head(&session.state.root_folder);
                self.commit(session, |state| {
                    if let Some(plan) = state.plan.as_mut() {
                        plan.mark_current(TaskStatus::Done)?;
                    }
                    Self::record_head(state, head);
                    Self::advance_plan(state)
                })?;
                info!(
                    project = %session.state.id,
                    task = %task.id,
                    cursor = session.state.cursor(),
                    "task completed: {}",
                    output.summary
                );
            }
            WorkUnit::PhaseOperation { phase } if phase.produces_plan() => {
                let tasks = match output.plan {
                    Some(tasks) if !tasks.is_empty() => tasks,
                    _ => {
                        let failure = TaskFailure::logic(format!(
                            "{} produced no plan",
                            phase.display_name()
                        ));
                        return self.on_failure(session, unit, failure).await;
                    }
                };
                session.retry.reset();
                let count = tasks.len();
                let head = self.observed_head(&session.state.root_folder);
                self.commit(session, |state| {
                    Self::install_plan(state, tasks);
                    Self::record_head(state, head);
                    state.phase = state.phase.transition(PhaseEvent::PlanLoaded)?;
                    Ok(())
                })?;
                info!(project = %session.state.id, tasks = count, "{} produced a plan", phase);
            }
            WorkUnit::PhaseOperation { phase } => {
                session.retry.reset();
                let from = *phase;
                let head = self.observed_head(&session.state.root_folder);
                self.commit(session, |state| {
                    Self::record_head(state, head);
                    state.phase = state.phase.transition(PhaseEvent::WorkCompleted)?;
                    Ok(())
                })?;
                info!(
                    project = %session.state.id,
                    %from,
                    to = %session.state.phase,
                    "phase completed: {}",
                    output.summary
                );
            }
        }
        Ok(())
    }

    async fn on_failure(
        &self,
        session: &mut ProjectSession,
        unit: WorkUnit,
        failure: TaskFailure,
    ) -> Result<(), OrchestratorError> {
        match self
            .settings
            .policy
            .on_failure(&unit, &mut session.retry, &failure)
        {
            EscalationOutcome::Retry { delay, .. } => {
                if delay > Duration::ZERO {
                    tokio::time::sleep(delay).await;
                }
                self.submit(session, unit)?;
            }
            EscalationOutcome::Escalate(checkpoint) => {
                let resume = session.state.phase;
                self.raise(session, checkpoint, resume)?;
            }
        }
        Ok(())
    }

    /// Run preflight, then raise what it finds or lift a pause.
    ///
    /// An outstanding preflight checkpoint is shown again as is. Any other
    /// outstanding checkpoint is set aside behind the preflight one and
    /// comes back once the working tree is accepted.
    fn reenter(&self, session: &mut ProjectSession) -> Result<(), OrchestratorError> {
        if session
            .state
            .checkpoint
            .as_ref()
            .is_some_and(|request| request.checkpoint.is_preflight())
        {
            return Ok(());
        }
        let operational = session.state.operational_phase();
        let root = session.state.root_folder.clone();

        let head = if operational.has_working_tree() {
            let result = preflight::reconcile(
                self.workspace.as_ref(),
                &root,
                session.state.expected_head.as_deref(),
            );
            if let Some(checkpoint) = result.into_checkpoint() {
                if let Some(kind) = session.state.checkpoint.as_ref().map(|r| r.checkpoint.kind()) {
                    info!(
                        project = %session.state.id,
                        checkpoint = kind,
                        "checkpoint set aside until preflight is resolved"
                    );
                    self.commit(session, |state| {
                        state.deferred_checkpoint = state.checkpoint.clone();
                        Self::clear_checkpoint(state)
                    })?;
                }
                self.raise(session, checkpoint, operational)?;
                return Ok(());
            }
            self.observed_head(&root)
        } else {
            None
        };

        let lifting = session.state.phase == Phase::Paused;
        let restoring = session.state.deferred_checkpoint.is_some();
        let moved = head.is_some() && head != session.state.expected_head;
        if !(lifting || restoring || moved) {
            return Ok(());
        }
        self.commit(session, |state| {
            if lifting {
                state.phase = state.phase.transition(PhaseEvent::Resume(operational))?;
                state.paused_from = None;
            }
            Self::record_head(state, head);
            Self::restore_deferred(state)
        })?;
        if lifting {
            info!(project = %session.state.id, phase = %operational, "project resumed");
        }
        Ok(())
    }

    /// Adopt an observed HEAD as the one preflight expects next time.
    fn record_head(state: &mut ProjectState, head: Option<String>) {
        if head.is_some() {
            state.expected_head = head;
        }
    }

    fn observed_head(&self, root: &Path) -> Option<String> {
        self.workspace.status(root).ok().and_then(|s| s.head)
    }

    /// Commands that mutate state need the control context to be idle.
    fn ensure_idle(session: &ProjectSession) -> Result<(), OrchestratorError> {
        if session.is_running() {
            return Err(OrchestratorError::AlreadyRunning {
                project_id: session.state.id.clone(),
            });
        }
        Ok(())
    }

    /// Idle, not on a detour, and no decision pending.
    fn ensure_ready(session: &ProjectSession) -> Result<(), OrchestratorError> {
        Self::ensure_idle(session)?;
        if let Some(detour) = session.detour {
            return Err(OrchestratorError::NothingToProceed { phase: detour });
        }
        if let Some(request) = &session.state.checkpoint {
            return Err(OrchestratorError::AwaitingDecision {
                kind: request.checkpoint.kind().to_string(),
            });
        }
        Ok(())
    }
}

fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    if cleaned.trim_matches('-').is_empty() {
        "project".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_archive_names() {
        assert_eq!(sanitize("My App"), "My-App");
        assert_eq!(sanitize("a/b"), "a-b");
        assert_eq!(sanitize("  "), "project");
        assert_eq!(sanitize("ok_name-1"), "ok_name-1");
    }

    #[test]
    fn test_advance_plan_leaves_development_at_end() {
        let mut state = ProjectState::new("demo", Path::new("/tmp/demo"));
        state.phase = Phase::Development;
        state.plan = Some(Plan::new(vec![Task::new("T-1", "a", ""), Task::new("T-2", "b", "")]));

        Orchestrator::advance_plan(&mut state).unwrap();
        assert_eq!(state.phase, Phase::Development);
        assert_eq!(state.cursor(), 1);

        Orchestrator::advance_plan(&mut state).unwrap();
        assert_eq!(state.phase, Phase::PlanComplete);
        assert_eq!(state.cursor(), 2);
        assert!(matches!(
            Orchestrator::advance_plan(&mut state),
            Err(OrchestratorError::PlanExhausted)
        ));
    }

    #[test]
    fn test_restore_deferred_waits_for_pause_to_lift() {
        let mut state = ProjectState::new("demo", Path::new("/tmp/demo"));
        state.phase = Phase::Paused;
        state.deferred_checkpoint = Some(CheckpointRequest::new(
            Checkpoint::ManualGate {
                task_id: "T-2".into(),
                description: "deploy".into(),
            },
            Phase::Development,
        ));

        Orchestrator::restore_deferred(&mut state).unwrap();
        assert!(state.checkpoint.is_none());
        assert_eq!(state.phase, Phase::Paused);

        state.phase = Phase::Development;
        Orchestrator::restore_deferred(&mut state).unwrap();
        assert_eq!(state.phase, Phase::AwaitingManualGate);
        assert!(state.deferred_checkpoint.is_none());
        assert_eq!(
            state.checkpoint.as_ref().map(|r| r.checkpoint.kind()),
            Some("manual-gate")
        );
    }

    #[test]
    fn test_clear_checkpoint_returns_to_resume_phase() {
        let mut state = ProjectState::new("demo", Path::new("/tmp/demo"));
        state.phase = Phase::AwaitingPreflightResolution;
        state.paused_from = Some(Phase::Planning);
        state.checkpoint = Some(CheckpointRequest::new(
            Checkpoint::StateDrift {
                summary: "x".into(),
            },
            Phase::Planning,
        ));
        Orchestrator::clear_checkpoint(&mut state).unwrap();
        assert_eq!(state.phase, Phase::Planning);
        assert!(state.checkpoint.is_none());
        assert!(state.paused_from.is_none());
    }
}
