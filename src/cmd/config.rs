//! Configuration view and validation commands, `dockbridge config`.

use anyhow::Result;
use dockbridge::BridgeConfig;

use super::super::{Cli, ConfigCommands};

pub fn cmd_config(
    cli: &Cli,
    project_dir: &std::path::Path,
    command: Option<ConfigCommands>,
) -> Result<()> {
    let config_path = super::config_path(cli, project_dir);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("Bridge Configuration");
            println!("====================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No bridge.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = super::resolve_config(cli, project_dir)?;
            println!("[server]");
            println!("  url = \"{}\"", config.server.url);
            println!(
                "  connect_timeout_secs = {}",
                config.server.connect_timeout_secs
            );
            println!();
            println!("[reconnect]");
            println!("  base_delay_ms = {}", config.reconnect.base_delay_ms);
            println!("  max_delay_ms = {}", config.reconnect.max_delay_ms);
            println!("  max_attempts = {}", config.reconnect.max_attempts);
            println!();
            println!("[request]");
            println!("  timeout_secs = {}", config.request.timeout_secs);
            println!();
            println!("[logs]");
            println!("  max_entries = {}", config.logs.max_entries);
            println!();

            match config.endpoints() {
                Ok(endpoints) => {
                    println!("Effective endpoints (with env/CLI overrides):");
                    println!("  stream  = {}", endpoints.ws_url);
                    println!("  execute = {}", endpoints.execute_url());
                    println!("  health  = {}", endpoints.health_url());
                }
                Err(e) => println!("Endpoints unavailable: {}", e),
            }
            println!();
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let config = super::resolve_config(cli, project_dir)?;
            let warnings = config.validate();

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
                println!("bridge.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            BridgeConfig::default().save(&config_path)?;

            println!("Created bridge.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [server] url, connect_timeout_secs");
            println!("  - [reconnect] base_delay_ms, max_delay_ms, max_attempts");
            println!("  - [request] timeout_secs");
            println!();
        }
    }

    Ok(())
}
