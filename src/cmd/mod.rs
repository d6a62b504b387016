//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `run`    | `Run`, `Watch`   |
//! | `health` | `Health`         |
//! | `config` | `Config`         |

pub mod config;
pub mod health;
pub mod run;

pub use config::cmd_config;
pub use health::cmd_health;
pub use run::{cmd_run, cmd_watch};

use anyhow::{Context, Result};
use console::style;
use dockbridge::BridgeConfig;
use dockbridge::logbuf::{LogEntry, Severity};
use std::path::{Path, PathBuf};

use super::Cli;

/// Path of the config file in effect: `--config`, else the project default.
pub fn config_path(cli: &Cli, project_dir: &Path) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| BridgeConfig::config_path(project_dir))
}

/// Load configuration, layering file → environment → CLI flags.
pub fn resolve_config(cli: &Cli, project_dir: &Path) -> Result<BridgeConfig> {
    let mut config = match &cli.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::load_or_default(project_dir)?,
    };
    config
        .apply_env()
        .context("Invalid configuration in environment")?;
    if let Some(server) = &cli.server {
        config.server.url = server.clone();
    }
    Ok(config)
}

/// One log entry, coloured by severity.
pub fn render_entry(entry: &LogEntry) -> String {
    let line = entry.to_string();
    match entry.severity {
        Severity::Info => line,
        Severity::Success => style(line).green().to_string(),
        Severity::Warning => style(line).yellow().to_string(),
        Severity::Error => style(line).red().to_string(),
        Severity::Input => style(line).cyan().to_string(),
    }
}
