//! Configuration for Waypoint, read from `.waypoint/waypoint.toml`.
//!
//! Settings are layered file → environment → CLI. Every key is optional; a
//! missing file yields the defaults shown here.
//!
//! ```toml
//! [project]
//! name = "shop-frontend"
//!
//! [engine]
//! max_retries = 2
//! retry_backoff_ms = 0
//! auto_proceed = false
//! max_workers = 4
//! event_buffer = 64
//!
//! [executor]
//! command = "waypoint-agent"
//! args = ["--stream"]
//! timeout_secs = 1800
//!
//! [archive]
//! dir = ".waypoint/archive"
//!
//! [logging]
//! json = false
//! file = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::escalation::{DEFAULT_MAX_RETRIES, EscalationPolicy};
use crate::orchestrator::EngineSettings;

pub const CONFIG_FILE: &str = "waypoint.toml";

/// Environment variable overriding `[executor] command`.
pub const ENV_AGENT_CMD: &str = "WAYPOINT_AGENT_CMD";
/// Environment variable overriding `[engine] max_retries`.
pub const ENV_MAX_RETRIES: &str = "WAYPOINT_MAX_RETRIES";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Project name (optional, defaults to directory name)
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// Automatic retries before a failure is escalated.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before retrying a transient failure.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Keep submitting plan tasks after each success.
    #[serde(default)]
    pub auto_proceed: bool,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_workers() -> usize {
    4
}

fn default_event_buffer() -> usize {
    64
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: 0,
            auto_proceed: false,
            max_workers: default_max_workers(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// The external agent that performs work units.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSection {
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Kill the agent after this many seconds; unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArchiveSection {
    /// Where exported snapshots are written. Relative paths resolve
    /// against the project directory.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub json: bool,
    /// Also write a daily log file under `.waypoint/logs/`.
    #[serde(default = "default_log_file")]
    pub file: bool,
}

fn default_log_file() -> bool {
    true
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            json: false,
            file: default_log_file(),
        }
    }
}

/// Parsed `waypoint.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaypointToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub archive: ArchiveSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl WaypointToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse waypoint.toml")
    }

    /// Load `waypoint.toml` from the data directory, or the defaults if the
    /// file doesn't exist.
    pub fn load_or_default(waypoint_dir: &Path) -> Result<Self> {
        let config_path = waypoint_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize waypoint.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Agent command (env → file → default).
    pub fn agent_cmd(&self) -> String {
        std::env::var(ENV_AGENT_CMD)
            .ok()
            .filter(|cmd| !cmd.trim().is_empty())
            .or_else(|| self.executor.command.clone())
            .unwrap_or_else(|| "waypoint-agent".to_string())
    }

    /// Retry bound (env → file).
    pub fn max_retries(&self) -> u32 {
        std::env::var(ENV_MAX_RETRIES)
            .ok()
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(self.engine.max_retries)
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.engine.max_workers == 0 {
            warnings.push("engine.max_workers is 0; at least one worker is used".to_string());
        }
        if self.engine.event_buffer == 0 {
            warnings.push("engine.event_buffer is 0; a buffer of 1 is used".to_string());
        }
        if self.engine.max_retries > 10 {
            warnings.push(format!(
                "engine.max_retries = {} is unusually high; failures will take long to escalate",
                self.engine.max_retries
            ));
        }
        if let Some(cmd) = &self.executor.command
            && cmd.trim().is_empty()
        {
            warnings.push("executor.command is empty".to_string());
        }
        if self.executor.timeout_secs == Some(0) {
            warnings.push("executor.timeout_secs = 0 kills every task at once".to_string());
        }
        if let Ok(value) = std::env::var(ENV_MAX_RETRIES)
            && value.trim().parse::<u32>().is_err()
        {
            warnings.push(format!(
                "{} = '{}' is not a number and is ignored",
                ENV_MAX_RETRIES, value
            ));
        }

        warnings
    }
}

/// Resolved configuration for one project directory.
///
/// Merges:
/// 1. waypoint.toml
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct WaypointConfig {
    pub project_dir: PathBuf,
    pub waypoint_dir: PathBuf,
    pub toml: WaypointToml,
    pub verbose: bool,
    /// CLI override for `[engine] auto_proceed`
    pub cli_auto_proceed: bool,
    /// CLI override for `[logging] json`
    pub cli_log_json: bool,
}

impl WaypointConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let waypoint_dir = project_dir.join(crate::init::WAYPOINT_DIR);
        let toml = WaypointToml::load_or_default(&waypoint_dir)?;

        Ok(Self {
            project_dir,
            waypoint_dir,
            toml,
            verbose: false,
            cli_auto_proceed: false,
            cli_log_json: false,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        auto_proceed: bool,
        log_json: bool,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_auto_proceed = auto_proceed;
        config.cli_log_json = log_json;
        Ok(config)
    }

    pub fn project_name(&self) -> String {
        self.toml.project.name.clone().unwrap_or_else(|| {
            self.project_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string())
        })
    }

    pub fn auto_proceed(&self) -> bool {
        self.cli_auto_proceed || self.toml.engine.auto_proceed
    }

    pub fn log_json(&self) -> bool {
        self.cli_log_json || self.toml.logging.json
    }

    pub fn agent_cmd(&self) -> String {
        self.toml.agent_cmd()
    }

    pub fn agent_args(&self) -> &[String] {
        &self.toml.executor.args
    }

    pub fn agent_timeout(&self) -> Option<Duration> {
        self.toml.executor.timeout_secs.map(Duration::from_secs)
    }

    pub fn config_file(&self) -> PathBuf {
        self.waypoint_dir.join(CONFIG_FILE)
    }

    pub fn state_db(&self) -> PathBuf {
        self.waypoint_dir.join("state.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.waypoint_dir.join("logs")
    }

    pub fn archive_dir(&self) -> PathBuf {
        match &self.toml.archive.dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.project_dir.join(dir),
            None => self.waypoint_dir.join("archive"),
        }
    }

    /// Engine tunables after all layers are applied.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            policy: EscalationPolicy {
                max_retries: self.toml.max_retries(),
                backoff: Duration::from_millis(self.toml.engine.retry_backoff_ms),
            },
            auto_proceed: self.auto_proceed(),
            max_workers: self.toml.engine.max_workers.max(1),
            event_buffer: self.toml.engine.event_buffer.max(1),
            archive_dir: self.archive_dir(),
        }
    }

    pub fn validate(&self) -> Vec<String> {
        self.toml.validate()
    }
}
