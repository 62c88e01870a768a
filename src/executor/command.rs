//! Executor that runs an external agent command per work unit.
//!
//! The command receives the serialized [`WorkRequest`] on stdin and a few
//! `WAYPOINT_*` environment variables, and reports back using the line
//! protocol in [`crate::stream`]. Exit status maps onto failure classes:
//!
//! | Outcome                         | Class         |
//! |---------------------------------|---------------|
//! | spawn failure, exit 126 or 127  | `environment` |
//! | exit 75 (EX_TEMPFAIL), timeout  | `transient`   |
//! | killed by a signal              | `transient`   |
//! | any other non-zero exit         | `logic`       |
//!
//! An explicit `failure` event on stdout takes precedence over the exit code.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, info, warn};

use super::{TaskExecutor, WorkRequest};
use crate::coordinator::{TaskContext, TaskOutput};
use crate::errors::TaskFailure;
use crate::plan::{Task, parse_plan};
use crate::stream::{AgentEvent, AgentLine, parse_line, truncate_line};

const EXIT_TEMPFAIL: i32 = 75;
const EXIT_NOT_EXECUTABLE: i32 = 126;
const EXIT_NOT_FOUND: i32 = 127;

/// Lines of plain output kept for the summary when no `result` event arrives.
const SUMMARY_TAIL: usize = 5;

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

#[derive(Default)]
struct StreamOutcome {
    summary: Option<String>,
    text: Vec<String>,
    plan: Option<Vec<Task>>,
    failure: Option<TaskFailure>,
}

enum ReadEnd {
    Finished(std::io::Result<()>),
    TimedOut,
    Cancelled,
}

impl CommandExecutor {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn build_command(&self, request: &WorkRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env("WAYPOINT_PROJECT_ID", &request.project_id)
            .env("WAYPOINT_PROJECT_NAME", &request.project_name)
            .env("WAYPOINT_PROJECT_ROOT", &request.root)
            .env("WAYPOINT_PHASE", request.phase.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(task_id) = request.unit.task_id() {
            cmd.env("WAYPOINT_TASK_ID", task_id);
        }
        // The environment-setup operation may be the one creating the root.
        if request.root.is_dir() {
            cmd.current_dir(&request.root);
        }
        cmd
    }
}

#[async_trait]
impl TaskExecutor for CommandExecutor {
    async fn execute(
        &self,
        request: WorkRequest,
        ctx: TaskContext,
    ) -> Result<TaskOutput, TaskFailure> {
        let payload = serde_json::to_string(&request)
            .map_err(|e| TaskFailure::logic(format!("Failed to serialize work request: {}", e)))?;

        let start = Instant::now();
        let mut child = self.build_command(&request).spawn().map_err(|e| {
            TaskFailure::environment(format!(
                "Failed to spawn agent command '{}': {}",
                self.program, e
            ))
        })?;
        info!(
            unit = %request.unit.label(),
            pid = child.id().unwrap_or(0),
            "agent command spawned"
        );

        if let Some(mut stdin) = child.stdin.take() {
            // A command that ignores stdin may close it early; that is not a failure.
            if let Err(e) = stdin.write_all(payload.as_bytes()).await {
                debug!("agent closed stdin early: {}", e);
            }
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TaskFailure::environment("Failed to capture agent stdout"))?;
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let mut outcome = StreamOutcome::default();
        let end = {
            let pump = pump_stdout(stdout, &ctx, &mut outcome);
            tokio::select! {
                result = pump => ReadEnd::Finished(result),
                _ = deadline(self.timeout) => ReadEnd::TimedOut,
                _ = ctx.cancelled() => ReadEnd::Cancelled,
            }
        };

        match end {
            ReadEnd::Finished(Ok(())) => {}
            ReadEnd::Finished(Err(e)) => {
                let _ = child.kill().await;
                return Err(TaskFailure::environment(format!(
                    "Failed to read agent output: {}",
                    e
                )));
            }
            ReadEnd::TimedOut => {
                let _ = child.kill().await;
                warn!(unit = %request.unit.label(), "agent command timed out");
                return Err(TaskFailure::transient(format!(
                    "Agent command timed out after {}s",
                    self.timeout.map(|t| t.as_secs()).unwrap_or_default()
                )));
            }
            ReadEnd::Cancelled => {
                let _ = child.kill().await;
                return Err(TaskFailure::transient("Agent command cancelled"));
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| TaskFailure::environment(format!("Failed to wait for agent: {}", e)))?;
        let stderr = match stderr_task {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            code = ?status.code(),
            "agent command exited"
        );

        if let Some(failure) = outcome.failure {
            return Err(failure);
        }

        match status.code() {
            Some(0) => {}
            Some(code) => return Err(classify_exit(code, &stderr)),
            None => return Err(TaskFailure::transient("Agent command killed by a signal")),
        }

        let summary = outcome.summary.unwrap_or_else(|| {
            let start = outcome.text.len().saturating_sub(SUMMARY_TAIL);
            outcome.text[start..].join("\n")
        });
        Ok(TaskOutput {
            summary,
            plan: outcome.plan,
        })
    }
}

async fn pump_stdout(
    stdout: ChildStdout,
    ctx: &TaskContext,
    outcome: &mut StreamOutcome,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stdout).lines();
    while let Some(line) = reader.next_line().await? {
        match parse_line(&line) {
            Some(AgentLine::Event(AgentEvent::Progress {
                status,
                message,
                data,
            })) => {
                let payload = match message {
                    Some(message) => serde_json::json!({ "message": message, "data": data }),
                    None => data,
                };
                ctx.progress(&status, payload).await;
            }
            Some(AgentLine::Event(AgentEvent::Plan { tasks })) => {
                match parse_plan(&tasks.to_string()) {
                    Ok(parsed) => outcome.plan = Some(parsed),
                    Err(e) => {
                        outcome.failure = Some(TaskFailure::logic(format!(
                            "Agent emitted an invalid plan: {:#}",
                            e
                        )))
                    }
                }
            }
            Some(AgentLine::Event(AgentEvent::Failure { class, message })) => {
                outcome.failure = Some(TaskFailure::new(class, message));
            }
            Some(AgentLine::Event(AgentEvent::Result { summary })) => {
                outcome.summary = Some(summary);
            }
            Some(AgentLine::Text(text)) => {
                ctx.progress("output", serde_json::json!({ "message": truncate_line(&text, 120) }))
                    .await;
                outcome.text.push(text);
            }
            None => {}
        }
    }
    Ok(())
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending::<()>().await,
    }
}

fn classify_exit(code: i32, stderr: &str) -> TaskFailure {
    let detail = match stderr.trim() {
        "" => String::new(),
        s => format!(": {}", truncate_line(s.lines().last().unwrap_or(s), 200)),
    };
    match code {
        EXIT_TEMPFAIL => TaskFailure::transient(format!("Agent exited with code {}{}", code, detail)),
        EXIT_NOT_EXECUTABLE | EXIT_NOT_FOUND => {
            TaskFailure::environment(format!("Agent exited with code {}{}", code, detail))
        }
        _ => TaskFailure::logic(format!("Agent exited with code {}{}", code, detail)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::coordinator::{TaskCoordinator, TaskEventKind, TaskResult};
    use crate::errors::FailureClass;
    use crate::executor::WorkUnit;
    use crate::phase::Phase;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn request(root: &std::path::Path, unit: WorkUnit) -> WorkRequest {
        WorkRequest {
            project_id: "p1".to_string(),
            project_name: "demo".to_string(),
            root: root.to_path_buf(),
            phase: Phase::Development,
            unit,
        }
    }

    fn sh(script: &str) -> CommandExecutor {
        CommandExecutor::new("sh", vec!["-c".to_string(), script.to_string()])
    }

    async fn run(executor: CommandExecutor, unit: WorkUnit) -> (TaskResult, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = TaskCoordinator::new(1);
        let (tx, mut rx) = mpsc::channel(64);
        let executor = Arc::new(executor);
        let req = request(dir.path(), unit);
        let handle = coordinator
            .submit("p1", tx, move |ctx| async move { executor.execute(req, ctx).await })
            .unwrap();
        let result = handle.join().await;
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TaskEventKind::Progress { status, .. } = event.kind {
                statuses.push(status);
            }
        }
        (result, statuses)
    }

    fn task_unit() -> WorkUnit {
        WorkUnit::task(Task::new("T-1", "do it", "a.rs"))
    }

    #[tokio::test]
    async fn test_success_with_result_and_progress() {
        let (result, statuses) = run(
            sh(r#"echo '{"type":"progress","status":"editing"}'; echo '{"type":"result","summary":"all good"}'"#),
            task_unit(),
        )
        .await;
        match result {
            TaskResult::Succeeded { output } => assert_eq!(output.summary, "all good"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(statuses, vec!["editing"]);
    }

    #[tokio::test]
    async fn test_plain_output_becomes_summary() {
        let (result, _) = run(sh("echo line one; echo line two"), task_unit()).await;
        match result {
            TaskResult::Succeeded { output } => assert_eq!(output.summary, "line one\nline two"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_work_request_is_sent_on_stdin() {
        let (result, _) = run(
            sh(r#"grep -q '"id":"T-1"' && test "$WAYPOINT_TASK_ID" = T-1 && echo ok"#),
            task_unit(),
        )
        .await;
        assert!(matches!(result, TaskResult::Succeeded { .. }), "{result:?}");
    }

    #[tokio::test]
    async fn test_plan_event_is_parsed() {
        let (result, _) = run(
            sh(r#"echo '{"type":"plan","tasks":[{"description":"a"},{"description":"b"}]}'"#),
            WorkUnit::phase(Phase::Planning),
        )
        .await;
        match result {
            TaskResult::Succeeded { output } => assert_eq!(output.plan.unwrap().len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exit_codes_are_classified() {
        let cases = [
            ("exit 1", FailureClass::Logic),
            ("exit 75", FailureClass::Transient),
            ("exit 127", FailureClass::Environment),
        ];
        for (script, expected) in cases {
            let (result, _) = run(sh(script), task_unit()).await;
            match result {
                TaskResult::Failed { failure } => assert_eq!(failure.class, expected, "{script}"),
                other => panic!("unexpected {other:?} for {script}"),
            }
        }
    }

    #[tokio::test]
    async fn test_failure_event_overrides_exit_code() {
        let (result, _) = run(
            sh(r#"echo '{"type":"failure","class":"environment","message":"db down"}'; exit 0"#),
            task_unit(),
        )
        .await;
        match result {
            TaskResult::Failed { failure } => {
                assert_eq!(failure.class, FailureClass::Environment);
                assert_eq!(failure.message, "db down");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_program_is_environment_failure() {
        let (result, _) = run(
            CommandExecutor::new("/definitely/not/a/waypoint/agent", Vec::new()),
            task_unit(),
        )
        .await;
        match result {
            TaskResult::Failed { failure } => assert_eq!(failure.class, FailureClass::Environment),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_is_transient() {
        let (result, _) = run(
            sh("sleep 5").with_timeout(Some(Duration::from_millis(100))),
            task_unit(),
        )
        .await;
        match result {
            TaskResult::Failed { failure } => assert_eq!(failure.class, FailureClass::Transient),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_classify_exit_uses_last_stderr_line() {
        let failure = classify_exit(2, "warning: x\nerror: tests failed\n");
        assert_eq!(failure.class, FailureClass::Logic);
        assert!(failure.message.ends_with("error: tests failed"));
    }
}
