//! Background task coordinator.
//!
//! Runs task bodies on the tokio runtime behind a bounded worker pool, while
//! the control context keeps sole ownership of project state. Each body
//! reports through a [`TaskContext`]; the coordinator forwards progress to the
//! submitter's channel and always finishes with exactly one terminal event.
//!
//! Guarantees per submission:
//! - progress events arrive in emission order, before the terminal event
//! - no progress is forwarded once cancellation was requested
//! - a panicking body is reported as a `logic` failure
//! - at most one submission per project is unresolved at any time; the slot
//!   is released just before the terminal event is sent

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{OrchestratorError, TaskFailure};
use crate::plan::Task;

/// How long a cancelled body may keep running before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Successful result of a task body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub summary: String,
    /// Replacement plan produced by planning-style operations.
    #[serde(default)]
    pub plan: Option<Vec<Task>>,
}

impl TaskOutput {
    pub fn summary(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            plan: None,
        }
    }

    pub fn with_plan(mut self, tasks: Vec<Task>) -> Self {
        self.plan = Some(tasks);
        self
    }
}

/// Terminal outcome of a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskResult {
    Succeeded { output: TaskOutput },
    Failed { failure: TaskFailure },
    Cancelled,
}

/// Events delivered to the submitter's channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEventKind {
    Progress { status: String, payload: Value },
    Finished { result: TaskResult },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub submission_id: Uuid,
    pub project_id: String,
    #[serde(flatten)]
    pub kind: TaskEventKind,
}

/// Handle given to a running task body.
#[derive(Clone)]
pub struct TaskContext {
    submission_id: Uuid,
    project_id: String,
    sink: mpsc::Sender<TaskEvent>,
    cancel: CancellationToken,
}

impl TaskContext {
    /// Report progress. Dropped silently once cancellation was requested.
    pub async fn progress(&self, status: &str, payload: Value) {
        if self.cancel.is_cancelled() {
            return;
        }
        let event = TaskEvent {
            submission_id: self.submission_id,
            project_id: self.project_id.clone(),
            kind: TaskEventKind::Progress {
                status: status.to_string(),
                payload,
            },
        };
        if self.sink.send(event).await.is_err() {
            debug!(submission = %self.submission_id, "progress receiver dropped");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }
}

/// Submitter's handle on a running task.
#[derive(Debug)]
pub struct TaskHandle {
    submission_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<TaskResult>,
}

impl TaskHandle {
    pub fn submission_id(&self) -> Uuid {
        self.submission_id
    }

    /// Request cooperative cancellation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the submission to resolve. The terminal event has been sent
    /// (or the receiver was gone) by the time this returns.
    pub async fn join(self) -> TaskResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) => TaskResult::Failed {
                failure: TaskFailure::logic(format!("task driver failed: {}", e)),
            },
        }
    }
}

/// Bounded pool of background workers with one in-flight task per project.
#[derive(Clone)]
pub struct TaskCoordinator {
    in_flight: Arc<Mutex<HashMap<String, Uuid>>>,
    workers: Arc<Semaphore>,
}

impl TaskCoordinator {
    pub fn new(max_workers: usize) -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(Semaphore::new(max_workers.max(1))),
        }
    }

    /// Whether a submission for this project is still unresolved.
    pub fn is_running(&self, project_id: &str) -> bool {
        self.in_flight
            .lock()
            .map(|map| map.contains_key(project_id))
            .unwrap_or(false)
    }

    /// Start `task` in the background and return immediately.
    ///
    /// Fails with `AlreadyRunning` while an earlier submission for the same
    /// project is unresolved. Must be called from within a tokio runtime.
    pub fn submit<F, Fut>(
        &self,
        project_id: &str,
        sink: mpsc::Sender<TaskEvent>,
        task: F,
    ) -> Result<TaskHandle, OrchestratorError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send + 'static,
    {
        let submission_id = Uuid::new_v4();
        {
            let mut map = self
                .in_flight
                .lock()
                .map_err(|e| anyhow::anyhow!("In-flight lock poisoned: {}", e))?;
            if map.contains_key(project_id) {
                return Err(OrchestratorError::AlreadyRunning {
                    project_id: project_id.to_string(),
                });
            }
            map.insert(project_id.to_string(), submission_id);
        }

        let cancel = CancellationToken::new();
        let ctx = TaskContext {
            submission_id,
            project_id: project_id.to_string(),
            sink: sink.clone(),
            cancel: cancel.clone(),
        };
        let in_flight = self.in_flight.clone();
        let workers = self.workers.clone();
        let project = project_id.to_string();
        let token = cancel.clone();

        let join = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = workers.acquire_owned() => permit.ok(),
                _ = token.cancelled() => None,
            };

            let result = if token.is_cancelled() {
                TaskResult::Cancelled
            } else {
                run_body(task(ctx), &token).await
            };
            drop(permit);

            if let Ok(mut map) = in_flight.lock()
                && map.get(&project) == Some(&submission_id)
            {
                map.remove(&project);
            }

            let event = TaskEvent {
                submission_id,
                project_id: project,
                kind: TaskEventKind::Finished {
                    result: result.clone(),
                },
            };
            if sink.send(event).await.is_err() {
                debug!(submission = %submission_id, "terminal event receiver dropped");
            }
            result
        });

        Ok(TaskHandle {
            submission_id,
            cancel,
            join,
        })
    }
}

async fn run_body<Fut>(body: Fut, token: &CancellationToken) -> TaskResult
where
    Fut: Future<Output = Result<TaskOutput, TaskFailure>> + Send + 'static,
{
    let mut body = tokio::spawn(body);
    let joined = tokio::select! {
        joined = &mut body => joined,
        _ = token.cancelled() => {
            match tokio::time::timeout(CANCEL_GRACE, &mut body).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("task ignored cancellation for {:?}, aborting", CANCEL_GRACE);
                    body.abort();
                    return TaskResult::Cancelled;
                }
            }
        }
    };

    match joined {
        _ if token.is_cancelled() => TaskResult::Cancelled,
        Ok(Ok(output)) => TaskResult::Succeeded { output },
        Ok(Err(failure)) => TaskResult::Failed { failure },
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskResult::Failed {
                failure: TaskFailure::logic(format!("task panicked: {}", message)),
            }
        }
        Err(_) => TaskResult::Cancelled,
    }
}
