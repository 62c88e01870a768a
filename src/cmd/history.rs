//! Archived projects: listing, restoring, deleting and exporting.

use anyhow::Result;
use console::style;
use std::path::Path;

use waypoint::ui::icons::{CHECK, HISTORY};

use super::super::{Cli, HistoryCommands};
use super::open_engine;

pub fn cmd_history(cli: &Cli, project_dir: &Path, command: HistoryCommands) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;

    match command {
        HistoryCommands::List => {
            let records = orchestrator.list_history()?;
            println!();
            if records.is_empty() {
                println!("No archived projects.");
                println!();
                return Ok(());
            }
            println!("{}Project history", HISTORY);
            println!();
            println!(
                "  {:>5}  {:<20} {:<30} {:<17} Archive",
                "ID", "Name", "Phase", "Archived"
            );
            for record in records {
                println!(
                    "  {:>5}  {:<20} {:<30} {:<17} {}",
                    record.history_id,
                    record.project_name,
                    record.phase.display_name(),
                    record.archived_at.format("%Y-%m-%d %H:%M"),
                    record
                        .archive_path
                        .as_ref()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
            println!();
        }
        HistoryCommands::Resume { id } => {
            let session = orchestrator.resume_from_history(id)?;
            println!(
                "{}Restored {} from history entry {} in {}",
                CHECK,
                style(&session.state().name).bold(),
                id,
                style(session.phase().display_name()).cyan()
            );
            if let Some(request) = session.checkpoint() {
                waypoint::ui::print_checkpoint_summary(request);
                println!("Run 'waypoint resolve' to continue.");
            }
        }
        HistoryCommands::Delete { id } => {
            orchestrator.delete_history(id)?;
            println!("Deleted history entry {}", id);
        }
    }

    Ok(())
}

pub fn cmd_export(cli: &Cli, project_dir: &Path, name: Option<&str>) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let session = orchestrator.open_active()?;
    let record = orchestrator.export_and_archive(session, name)?;

    println!(
        "{}Archived {} as history entry {}",
        CHECK,
        style(&record.project_name).bold(),
        record.history_id
    );
    if let Some(path) = &record.archive_path {
        println!("  Snapshot: {}", path.display());
    }
    Ok(())
}
