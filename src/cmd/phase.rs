//! Phase overrides, user events and plan loading.

use anyhow::Result;
use console::style;
use std::path::Path;

use waypoint::phase::PhaseEvent;
use waypoint::plan::load_plan_file;

use super::super::Cli;
use super::open_engine;

pub fn cmd_set_phase(cli: &Cli, project_dir: &Path, name: &str) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let mut session = orchestrator.open_active()?;
    let phase = orchestrator.set_phase(&mut session, name)?;
    if phase.is_auxiliary() {
        println!(
            "Viewing {} {}",
            style(phase.display_name()).cyan(),
            style(format!("(project stays in {})", session.durable_phase().display_name())).dim()
        );
    } else {
        println!("Phase set to {}", style(phase.display_name()).cyan());
    }
    Ok(())
}

pub fn cmd_advance(cli: &Cli, project_dir: &Path, event: &str) -> Result<()> {
    let event: PhaseEvent = event.parse()?;
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let mut session = orchestrator.open_active()?;
    let from = session.phase();
    let to = orchestrator.transition(&mut session, event)?;
    println!(
        "{} → {}",
        style(from.display_name()).dim(),
        style(to.display_name()).cyan()
    );
    Ok(())
}

pub fn cmd_plan(cli: &Cli, project_dir: &Path, file: &Path) -> Result<()> {
    let tasks = load_plan_file(file)?;
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let mut session = orchestrator.open_active()?;
    let count = tasks.len();
    let gated = tasks.iter().filter(|t| t.requires_approval).count();
    let phase = orchestrator.load_plan(&mut session, tasks)?;

    println!(
        "Loaded {} task(s) from {}",
        style(count).bold(),
        file.display()
    );
    if gated > 0 {
        println!("  {} task(s) stop at a manual gate", gated);
    }
    println!("  Phase: {}", style(phase.display_name()).cyan());
    Ok(())
}
