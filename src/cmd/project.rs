//! Project initialization, creation, status and listing.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::super::Cli;
use super::open_engine;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use waypoint::init::{init_project, is_initialized};

    let was_initialized = is_initialized(project_dir);
    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized waypoint at {}",
            result.waypoint_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .waypoint/");
        println!("  ├── waypoint.toml # Configuration (use `waypoint config show`)");
        println!("  ├── logs/         # Daily rolling logs");
        println!("  └── archive/      # Exported project snapshots");
        println!();
        println!("Next steps:");
        println!("  1. Run `waypoint new <name>` to create a project");
        println!("  2. Run `waypoint proceed` to start the workflow");
    } else if was_initialized {
        println!(
            "Waypoint already initialized at {}",
            result.waypoint_dir.display()
        );
        println!("Directory structure verified.");
    }

    Ok(())
}

pub fn cmd_new(cli: &Cli, project_dir: &Path, name: &str, root: Option<&Path>) -> Result<()> {
    let (config, orchestrator) = open_engine(cli, project_dir)?;
    let root = match root {
        Some(root) if root.is_absolute() => root.to_path_buf(),
        Some(root) => config.project_dir.join(root),
        None => config.project_dir.clone(),
    };

    let session = orchestrator.start_project(name, &root)?;
    println!(
        "Created project {} {}",
        style(name).bold(),
        style(format!("({})", session.project_id())).dim()
    );
    println!("  Root:  {}", root.display());
    println!("  Phase: {}", session.phase().display_name());
    Ok(())
}

pub fn cmd_status(cli: &Cli, project_dir: &Path) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let session = orchestrator.open_active()?;
    println!();
    waypoint::ui::print_status(&session);
    println!();
    Ok(())
}

pub fn cmd_list(cli: &Cli, project_dir: &Path) -> Result<()> {
    let (_, orchestrator) = open_engine(cli, project_dir)?;
    let projects = orchestrator.list_projects()?;
    if projects.is_empty() {
        println!();
        println!("No projects yet. Run 'waypoint new <name>' to create one.");
        println!();
        return Ok(());
    }

    let active = orchestrator.open_active().ok().map(|s| s.project_id().to_string());
    println!();
    println!(
        "  {:<36} {:<20} {:<30} Updated",
        "ID", "Name", "Phase"
    );
    println!(
        "  {:<36} {:<20} {:<30} -------",
        "-".repeat(36),
        "-".repeat(20),
        "-".repeat(30)
    );
    for project in projects {
        let marker = if active.as_deref() == Some(project.id.as_str()) {
            style("*").green().to_string()
        } else {
            " ".to_string()
        };
        println!(
            "{} {:<36} {:<20} {:<30} {}",
            marker,
            project.id,
            project.name,
            project.phase.display_name(),
            project.updated_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!();
    Ok(())
}
