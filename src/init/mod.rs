//! `waypoint init`: create the `.waypoint/` data directory in a project.
//!
//! ```text
//! .waypoint/
//! ├── .gitignore       # "*": engine data never shows up as drift
//! ├── waypoint.toml    # configuration (defaults written on first init)
//! ├── state.db         # project state and history (created on first use)
//! ├── logs/            # daily rolling logs
//! └── archive/         # exported project snapshots
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::waypoint_config::{CONFIG_FILE, WaypointToml};

/// The name of the waypoint data directory.
pub const WAYPOINT_DIR: &str = ".waypoint";

#[derive(Debug)]
pub struct InitResult {
    pub waypoint_dir: PathBuf,
    /// Whether the directory was newly created (false if it already existed)
    pub created: bool,
}

/// Initialize waypoint in the given directory. Re-running repairs a
/// partial layout and never overwrites an existing config.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let waypoint_dir = project_dir.join(WAYPOINT_DIR);
    let created = !waypoint_dir.exists();

    std::fs::create_dir_all(&waypoint_dir)
        .with_context(|| format!("Failed to create directory: {}", waypoint_dir.display()))?;
    ensure_directory_structure(&waypoint_dir)?;

    Ok(InitResult {
        waypoint_dir,
        created,
    })
}

fn ensure_directory_structure(waypoint_dir: &Path) -> Result<()> {
    for sub in ["logs", "archive"] {
        let dir = waypoint_dir.join(sub);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let gitignore = waypoint_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, "*\n")
            .with_context(|| format!("Failed to create {}", gitignore.display()))?;
    }

    let config = waypoint_dir.join(CONFIG_FILE);
    if !config.exists() {
        WaypointToml::default().save(&config)?;
    }

    Ok(())
}

/// Check if a project has been initialized.
pub fn is_initialized(project_dir: &Path) -> bool {
    project_dir.join(WAYPOINT_DIR).is_dir()
}

pub fn get_waypoint_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(WAYPOINT_DIR)
}
