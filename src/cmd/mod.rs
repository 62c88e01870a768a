//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled                                  |
//! |------------|---------------------------------------------------|
//! | `project`  | `Init`, `New`, `Status`, `List`                   |
//! | `phase`    | `SetPhase`, `Advance`, `Plan`                     |
//! | `run`      | `Proceed`, `Resolve`, `Pause`, `Resume`           |
//! | `history`  | `History`, `Export`                               |
//! | `config`   | `Config`                                          |

pub mod config;
pub mod history;
pub mod phase;
pub mod project;
pub mod run;

pub use config::cmd_config;
pub use history::{cmd_export, cmd_history};
pub use phase::{cmd_advance, cmd_plan, cmd_set_phase};
pub use project::{cmd_init, cmd_list, cmd_new, cmd_status};
pub use run::{cmd_pause, cmd_proceed, cmd_resolve, cmd_resume};

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;
use waypoint::executor::CommandExecutor;
use waypoint::init::is_initialized;
use waypoint::orchestrator::Orchestrator;
use waypoint::store::SqliteStore;
use waypoint::telemetry::{LogOptions, init_logging as init_subscriber};
use waypoint::tracker::GitWorkspace;
use waypoint::waypoint_config::{WaypointConfig, WaypointToml};

use super::Cli;

/// Install logging. File output only once the project is initialized.
pub fn init_logging(cli: &Cli, project_dir: &Path) -> Result<Option<WorkerGuard>> {
    let waypoint_dir = waypoint::init::get_waypoint_dir(project_dir);
    let toml = WaypointToml::load_or_default(&waypoint_dir).unwrap_or_default();
    let log_dir = waypoint_dir.join("logs");
    init_subscriber(LogOptions {
        verbose: cli.verbose,
        json: cli.log_json || toml.logging.json,
        log_dir: toml.logging.file.then_some(log_dir.as_path()),
    })
}

pub fn check_initialized(project_dir: &Path) -> Result<()> {
    if !is_initialized(project_dir) {
        anyhow::bail!("Project not initialized. Run 'waypoint init' first.");
    }
    Ok(())
}

/// Resolve configuration and wire the orchestrator's collaborators.
pub fn open_engine(cli: &Cli, project_dir: &Path) -> Result<(WaypointConfig, Orchestrator)> {
    check_initialized(project_dir)?;
    let config = WaypointConfig::with_cli_args(
        project_dir.to_path_buf(),
        cli.verbose,
        cli.auto_proceed,
        cli.log_json,
    )?;

    let store = SqliteStore::open(&config.state_db())?;
    let executor = CommandExecutor::new(config.agent_cmd(), config.agent_args().to_vec())
        .with_timeout(config.agent_timeout());
    let orchestrator = Orchestrator::new(
        Arc::new(store),
        Arc::new(executor),
        Arc::new(GitWorkspace::new()),
        config.engine_settings(),
    );
    Ok((config, orchestrator))
}
