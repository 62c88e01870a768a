//! Running work: proceed, checkpoint resolution, pause and resume.

use anyhow::{Result, bail};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};
use std::path::Path;
use std::sync::Arc;

use waypoint::checkpoint::prompt::{print_checkpoint, prompt_decision};
use waypoint::checkpoint::{CheckpointRequest, Decision};
use waypoint::orchestrator::{CommandOutcome, DriveOutcome, Orchestrator, ProjectSession};
use waypoint::phase::Phase;
use waypoint::ui::TaskUI;
use waypoint::ui::icons::{CHECK, PAUSE, SPARKLE, WARNING};

use super::super::Cli;
use super::open_engine;

pub async fn cmd_proceed(cli: &Cli, project_dir: &Path, no_wait: bool) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let mut session = orchestrator.open_active()?;
    let outcome = orchestrator.proceed(&mut session)?;
    run_until_settled(&orchestrator, &mut session, outcome, no_wait, cli.verbose).await
}

pub async fn cmd_resolve(
    cli: &Cli,
    project_dir: &Path,
    option: Option<&str>,
    no_wait: bool,
) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let mut session = orchestrator.open_active()?;
    let Some(request) = session.checkpoint().cloned() else {
        bail!("No checkpoint is waiting for a decision.");
    };

    let decision = match option {
        Some(option) => option.parse::<Decision>()?,
        None if no_wait || !console::user_attended() => {
            print_checkpoint(&request);
            bail!(
                "A decision is required. Run 'waypoint resolve <option>' with one of: {}",
                option_list(&request)
            );
        }
        None => {
            print_checkpoint(&request);
            prompt_decision(&request)?
        }
    };

    let outcome = orchestrator.resolve_checkpoint(&mut session, decision)?;
    run_until_settled(&orchestrator, &mut session, outcome, no_wait, cli.verbose).await
}

pub async fn cmd_pause(cli: &Cli, project_dir: &Path) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let mut session = orchestrator.open_active()?;
    orchestrator.pause(&mut session).await?;
    print_paused(&session);
    Ok(())
}

pub fn cmd_resume(cli: &Cli, project_dir: &Path, project_id: Option<&str>) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let project_id = match project_id {
        Some(id) => id.to_string(),
        None => pick_project(&orchestrator)?,
    };

    let session = orchestrator.resume(&project_id)?;
    println!(
        "{}Resumed {} in {}",
        CHECK,
        style(&session.state().name).bold(),
        style(session.phase().display_name()).cyan()
    );
    if let Some(request) = session.checkpoint() {
        print_checkpoint(request);
        println!(
            "Run 'waypoint resolve' to choose one of: {}",
            option_list(request)
        );
    }
    Ok(())
}

/// Pick the active project, or ask which one to resume.
fn pick_project(orchestrator: &Orchestrator) -> Result<String> {
    if let Ok(session) = orchestrator.open_active() {
        return Ok(session.project_id().to_string());
    }
    let projects = orchestrator.list_projects()?;
    if projects.is_empty() {
        bail!("No projects to resume. Run 'waypoint new <name>' to create one.");
    }
    if !console::user_attended() {
        bail!("No active project. Pass a project id to 'waypoint resume'.");
    }

    let items: Vec<String> = projects
        .iter()
        .map(|p| format!("{}  {}", p.name, style(p.phase.display_name()).dim()))
        .collect();
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Which project?")
        .items(&items)
        .default(0)
        .interact()?;
    Ok(projects[selection].id.clone())
}

/// Follow a command's outcome until the project settles, prompting at
/// checkpoints when a terminal is attached.
async fn run_until_settled(
    orchestrator: &Orchestrator,
    session: &mut ProjectSession,
    mut outcome: CommandOutcome,
    no_wait: bool,
    verbose: bool,
) -> Result<()> {
    loop {
        outcome = match outcome {
            CommandOutcome::Submitted(unit) => {
                let ui = Arc::new(task_ui(session, verbose));
                ui.start_unit(&unit.label());
                let observer = Arc::clone(&ui);
                session.on_event(move |event| observer.on_event(event));

                let finished = {
                    let drive = orchestrator.drive(session);
                    tokio::pin!(drive);
                    tokio::select! {
                        outcome = &mut drive => Some(outcome),
                        _ = tokio::signal::ctrl_c() => None,
                    }
                };
                ui.finish();

                match finished {
                    Some(Ok(DriveOutcome::AwaitingDecision(request))) => {
                        CommandOutcome::CheckpointRaised(request)
                    }
                    Some(Ok(DriveOutcome::Settled(phase))) => {
                        print_settled(phase);
                        return Ok(());
                    }
                    Some(Ok(DriveOutcome::Cancelled(phase))) => {
                        println!("{}Work cancelled in {}", PAUSE, phase.display_name());
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => {
                        eprintln!();
                        eprintln!("{}Interrupted, pausing project...", WARNING);
                        orchestrator.pause(session).await?;
                        print_paused(session);
                        return Ok(());
                    }
                }
            }
            CommandOutcome::Advanced(phase)
                if phase == Phase::Development && orchestrator.settings().auto_proceed =>
            {
                orchestrator.proceed(session)?
            }
            CommandOutcome::Advanced(phase) => {
                print_settled(phase);
                return Ok(());
            }
            CommandOutcome::CheckpointRaised(request) => {
                print_checkpoint(&request);
                if no_wait || !console::user_attended() {
                    println!(
                        "Run 'waypoint resolve <option>' with one of: {}",
                        option_list(&request)
                    );
                    return Ok(());
                }
                let decision = prompt_decision(&request)?;
                orchestrator.resolve_checkpoint(session, decision)?
            }
            CommandOutcome::Paused => {
                print_paused(session);
                return Ok(());
            }
            CommandOutcome::Closed => {
                println!(
                    "Project {} released. Run 'waypoint resume' to pick a project.",
                    style(&session.state().name).bold()
                );
                return Ok(());
            }
        };
    }
}

fn task_ui(session: &ProjectSession, verbose: bool) -> TaskUI {
    let (total, done) = session
        .state()
        .plan
        .as_ref()
        .map(|p| (p.len() as u64, p.cursor() as u64))
        .unwrap_or((0, 0));
    TaskUI::new(total, done, verbose)
}

fn print_settled(phase: Phase) {
    let icon = if phase == Phase::Completed { &SPARKLE } else { &CHECK };
    println!("{}Now in {}", icon, style(phase.display_name()).cyan());
}

fn print_paused(session: &ProjectSession) {
    match session.state().paused_from {
        Some(from) => println!(
            "{}Paused {} {}",
            PAUSE,
            style(&session.state().name).bold(),
            style(format!("(resumes in {})", from.display_name())).dim()
        ),
        None => println!("{}Paused {}", PAUSE, style(&session.state().name).bold()),
    }
    if session.checkpoint().is_some() {
        println!("  A checkpoint is still waiting for a decision.");
    }
}

fn option_list(request: &CheckpointRequest) -> String {
    request
        .options
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
