use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::checkpoint::CheckpointRequest;
use crate::coordinator::{TaskEvent, TaskEventKind, TaskResult};
use crate::orchestrator::ProjectSession;
use crate::ui::icons::{CHECK, CROSS, FOLDER, GATE, PAUSE, PLAN, RUNNING, WARNING};

/// Terminal UI for a running project, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Plan bar: tasks completed out of the current plan
/// - Task bar: spinner with the running unit and its latest status
///
/// Safe to share with a session's event observer.
pub struct TaskUI {
    multi: MultiProgress,
    plan_bar: ProgressBar,
    task_bar: ProgressBar,
    verbose: bool,
    progress_events: AtomicU64,
}

impl TaskUI {
    pub fn new(total_tasks: u64, done: u64, verbose: bool) -> Self {
        let multi = MultiProgress::new();

        let plan_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        let plan_bar = multi.add(ProgressBar::new(total_tasks));
        plan_bar.set_style(plan_style);
        plan_bar.set_prefix(" Plan");
        plan_bar.set_position(done);

        let task_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let task_bar = multi.add(ProgressBar::new_spinner());
        task_bar.set_style(task_style);
        task_bar.set_prefix(" Task");

        Self {
            multi,
            plan_bar,
            task_bar,
            verbose,
            progress_events: AtomicU64::new(0),
        }
    }

    /// Print a line via `MultiProgress`, falling back to `eprintln!`.
    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    /// Start the spinner for a newly submitted unit.
    pub fn start_unit(&self, label: &str) {
        self.progress_events.store(0, Ordering::SeqCst);
        self.task_bar
            .set_message(format!("{}{}", RUNNING, style(label).cyan()));
        self.task_bar.enable_steady_tick(Duration::from_millis(100));
    }

    /// Reflect one task event in the bars.
    pub fn on_event(&self, event: &TaskEvent) {
        match &event.kind {
            TaskEventKind::Progress { status, payload } => {
                let n = self.progress_events.fetch_add(1, Ordering::SeqCst) + 1;
                let detail = payload
                    .get("message")
                    .or_else(|| payload.get("line"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                self.task_bar.set_message(format!(
                    "{} {}",
                    style(status).yellow(),
                    style(format!("(#{}) {}", n, detail)).dim()
                ));
                if self.verbose && !detail.is_empty() {
                    self.print_line(format!("    {} {}", style("→").dim(), style(detail).dim()));
                }
            }
            TaskEventKind::Finished { result } => match result {
                TaskResult::Succeeded { output } => {
                    self.plan_bar.inc(1);
                    self.print_line(format!("  {}{}", CHECK, output.summary));
                }
                TaskResult::Failed { failure } => {
                    self.print_line(format!("  {}{}", CROSS, style(failure).red()));
                }
                TaskResult::Cancelled => {
                    self.print_line(format!("  {}{}", PAUSE, style("cancelled").dim()));
                }
            },
        }
    }

    pub fn finish(&self) {
        self.task_bar.finish_and_clear();
        self.plan_bar.finish_and_clear();
    }
}

/// Print the project overview used by `waypoint status`.
pub fn print_status(session: &ProjectSession) {
    let state = session.state();
    println!(
        "{}{} {}",
        FOLDER,
        style(&state.name).bold(),
        style(format!("({})", state.id)).dim()
    );
    println!("  Root:    {}", state.root_folder.display());
    match session.detour() {
        Some(detour) => println!(
            "  Phase:   {} {}",
            style(detour.display_name()).cyan(),
            style(format!("(detour from {})", state.phase.display_name())).dim()
        ),
        None => println!("  Phase:   {}", style(state.phase.display_name()).cyan()),
    }
    if let Some(from) = state.paused_from {
        println!("  Paused:  resumes in {}", from.display_name());
    }
    if let Some(plan) = &state.plan {
        println!(
            "  {}Plan:  {}/{} tasks",
            PLAN,
            plan.cursor(),
            plan.len()
        );
        if let Some(task) = plan.current() {
            println!(
                "  Next:    {} {}",
                style(&task.id).bold(),
                task.description
            );
        }
    }
    if !state.backlog.is_empty() {
        println!("  Backlog: {} item(s)", state.backlog.len());
        for item in &state.backlog {
            println!("    - {} {}", style(&item.id).dim(), item.description);
        }
    }
    if let Some(request) = session.checkpoint() {
        print_checkpoint_summary(request);
    }
}

pub fn print_checkpoint_summary(request: &CheckpointRequest) {
    let icon = match request.checkpoint.kind() {
        "manual-gate" => &GATE,
        _ => &WARNING,
    };
    println!(
        "  {}{} {}",
        icon,
        style(request.checkpoint.kind()).yellow().bold(),
        request.checkpoint.headline()
    );
    println!(
        "  Options: {}",
        request
            .options
            .iter()
            .map(|d| d.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
}
