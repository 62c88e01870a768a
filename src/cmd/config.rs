//! Configuration view and validation commands: `waypoint config`.

use anyhow::Result;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &std::path::Path, command: Option<ConfigCommands>) -> Result<()> {
    use waypoint::init::get_waypoint_dir;
    use waypoint::waypoint_config::{CONFIG_FILE, WaypointConfig, WaypointToml};

    let waypoint_dir = get_waypoint_dir(project_dir);
    let config_path = waypoint_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Waypoint Configuration");
            println!("======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
                println!();

                let toml = WaypointToml::load(&config_path)?;
                print_sections(&toml);

                println!("Effective values (with env/CLI overrides):");
                let config = WaypointConfig::new(project_dir.to_path_buf())?;
                let settings = config.engine_settings();
                println!("  agent_cmd = \"{}\"", config.agent_cmd());
                println!("  max_retries = {}", settings.policy.max_retries);
                println!("  archive_dir = \"{}\"", settings.archive_dir.display());
                println!("  state_db = \"{}\"", config.state_db().display());
                println!();
            } else {
                println!("No waypoint.toml found at {}", config_path.display());
                println!();
                println!("Using default configuration:");
                print_sections(&WaypointToml::default());
                println!("Run 'waypoint config init' to create a waypoint.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No waypoint.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = WaypointToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("waypoint.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            if !waypoint_dir.exists() {
                std::fs::create_dir_all(&waypoint_dir)?;
            }

            WaypointToml::default().save(&config_path)?;

            println!("Created waypoint.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [engine] max_retries, retry_backoff_ms, auto_proceed");
            println!("  - [executor] command, args, timeout_secs");
            println!("  - [archive] dir and [logging] json, file");
            println!();
        }
    }

    Ok(())
}

fn print_sections(toml: &waypoint::waypoint_config::WaypointToml) {
    if let Some(name) = &toml.project.name {
        println!("[project]");
        println!("  name = \"{}\"", name);
        println!();
    }

    println!("[engine]");
    println!("  max_retries = {}", toml.engine.max_retries);
    println!("  retry_backoff_ms = {}", toml.engine.retry_backoff_ms);
    println!("  auto_proceed = {}", toml.engine.auto_proceed);
    println!("  max_workers = {}", toml.engine.max_workers);
    println!("  event_buffer = {}", toml.engine.event_buffer);
    println!();

    println!("[executor]");
    match &toml.executor.command {
        Some(cmd) => println!("  command = \"{}\"", cmd),
        None => println!("  command = (default)"),
    }
    if !toml.executor.args.is_empty() {
        println!("  args = {:?}", toml.executor.args);
    }
    if let Some(secs) = toml.executor.timeout_secs {
        println!("  timeout_secs = {}", secs);
    }
    println!();

    if let Some(dir) = &toml.archive.dir {
        println!("[archive]");
        println!("  dir = \"{}\"", dir.display());
        println!();
    }

    println!("[logging]");
    println!("  json = {}", toml.logging.json);
    println!("  file = {}", toml.logging.file);
    println!();
}
