use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about = "Phase-based workflow orchestration engine")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Keep submitting plan tasks after each success
    #[arg(long, global = true)]
    pub auto_proceed: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .waypoint directory in a project
    Init,
    /// Create a new project and make it active
    New {
        name: String,
        /// Working tree the project operates on (defaults to the project dir)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// Show the active project
    Status,
    /// List all projects
    List,
    /// Jump directly to a phase (kebab-case or SCREAMING_SNAKE names)
    SetPhase { name: String },
    /// Apply an event: start, complete, skip, integrate, change-request,
    /// report-bug, pause, abandon
    Advance { event: String },
    /// Load a development plan from a JSON file
    Plan { file: PathBuf },
    /// Run the next unit of work for the current phase
    Proceed {
        /// Exit at checkpoints instead of prompting for a decision
        #[arg(long)]
        no_wait: bool,
    },
    /// Resolve the outstanding checkpoint
    Resolve {
        /// Decision to apply; prompts when omitted
        option: Option<String>,
        #[arg(long)]
        no_wait: bool,
    },
    /// Pause the active project
    Pause,
    /// Resume a project, reconciling its working tree first
    Resume { project_id: Option<String> },
    /// Archived projects
    History {
        #[command(subcommand)]
        command: Option<HistoryCommands>,
    },
    /// Export the active project to the archive and move it into history
    Export {
        #[arg(short, long)]
        name: Option<String>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum HistoryCommands {
    /// List archived projects
    List,
    /// Restore an archived project and resume it
    Resume { id: i64 },
    /// Delete a history record
    Delete { id: i64 },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default waypoint.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let _log_guard = cmd::init_logging(&cli, &project_dir)?;

    match &cli.command {
        Commands::Init => cmd::cmd_init(&project_dir)?,
        Commands::New { name, root } => cmd::cmd_new(&cli, &project_dir, name, root.as_deref())?,
        Commands::Status => cmd::cmd_status(&cli, &project_dir)?,
        Commands::List => cmd::cmd_list(&cli, &project_dir)?,
        Commands::SetPhase { name } => cmd::cmd_set_phase(&cli, &project_dir, name)?,
        Commands::Advance { event } => cmd::cmd_advance(&cli, &project_dir, event)?,
        Commands::Plan { file } => cmd::cmd_plan(&cli, &project_dir, file)?,
        Commands::Proceed { no_wait } => cmd::cmd_proceed(&cli, &project_dir, *no_wait).await?,
        Commands::Resolve { option, no_wait } => {
            cmd::cmd_resolve(&cli, &project_dir, option.as_deref(), *no_wait).await?
        }
        Commands::Pause => cmd::cmd_pause(&cli, &project_dir).await?,
        Commands::Resume { project_id } => {
            cmd::cmd_resume(&cli, &project_dir, project_id.as_deref())?
        }
        Commands::History { command } => {
            cmd::cmd_history(&cli, &project_dir, command.clone().unwrap_or(HistoryCommands::List))?
        }
        Commands::Export { name } => cmd::cmd_export(&cli, &project_dir, name.as_deref())?,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone())?,
    }

    Ok(())
}
