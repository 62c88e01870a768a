use anyhow::{Result, bail};
use console::style;
use dialoguer::{Select, theme::ColorfulTheme};

use super::{Checkpoint, CheckpointRequest, Decision};

/// Print the checkpoint's details to the terminal.
pub fn print_checkpoint(request: &CheckpointRequest) {
    println!();
    println!(
        "{} {}",
        style("Checkpoint:").bold().yellow(),
        style(request.checkpoint.kind()).bold()
    );
    println!("  {}", request.checkpoint.headline());

    match &request.checkpoint {
        Checkpoint::DebugEscalation { failure, .. } => {
            println!("  {} {}", style("class:").dim(), failure.class);
        }
        Checkpoint::IntegrationConfirmation { known_issues } => {
            for issue in known_issues {
                println!("  {} {}", style("-").dim(), issue);
            }
        }
        _ => {}
    }
    println!(
        "  {} {}",
        style("resumes into:").dim(),
        request.resume_phase.display_name()
    );
    println!(
        "  {} {}",
        style("raised:").dim(),
        request.raised_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();
}

/// Ask the user to pick one of the offered decisions.
pub fn prompt_decision(request: &CheckpointRequest) -> Result<Decision> {
    if request.options.is_empty() {
        bail!("Checkpoint {} offers no options", request.checkpoint.kind());
    }
    let items: Vec<String> = request
        .options
        .iter()
        .map(|d| format!("{}  ({})", d.label(), d.as_str()))
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("How do you want to proceed?")
        .items(&items)
        .default(0)
        .interact()?;

    Ok(request.options[selection])
}
