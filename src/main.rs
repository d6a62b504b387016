use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dockbridge::logging::{self, LogFormat, LoggingOptions};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "dockbridge")]
#[command(version, about = "Run code on a remote robotics execution dock and stream the results")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Execution service URL (ws:// or wss://). Overrides bridge.toml and DOCKBRIDGE_SERVER_URL.
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Path to a bridge.toml. Defaults to .dockbridge/bridge.toml in the project directory.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Diagnostic log format: text or json
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Also write diagnostics to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Submit a Python file, stream its output and print the final joint state
    Run {
        /// Source file to run as main.py
        file: PathBuf,

        /// Text fed to the program's stdin
        #[arg(long)]
        stdin: Option<String>,

        /// Pytest file run after the program
        #[arg(long)]
        tests: Option<PathBuf>,

        /// Seconds to wait for trailing events after the service answers
        #[arg(long, default_value = "2")]
        wait: u64,
    },
    /// Connect and print events as they arrive
    Watch {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long)]
        duration: Option<u64>,

        /// Confirm every joint-state update back to the service
        #[arg(long)]
        ack: bool,
    },
    /// Probe the service's health endpoint
    Health,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration
    Validate,
    /// Create a default bridge.toml
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = logging::init(&LoggingOptions {
        verbose: cli.verbose,
        format: cli.log_format,
        file: cli.log_file.clone(),
    })?;

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run {
            file,
            stdin,
            tests,
            wait,
        } => {
            let config = cmd::resolve_config(&cli, &project_dir)?;
            cmd::cmd_run(&config, file, stdin.as_deref(), tests.as_deref(), *wait).await?
        }
        Commands::Watch { duration, ack } => {
            let config = cmd::resolve_config(&cli, &project_dir)?;
            cmd::cmd_watch(&config, *duration, *ack).await?
        }
        Commands::Health => {
            let config = cmd::resolve_config(&cli, &project_dir)?;
            cmd::cmd_health(&config).await?
        }
        Commands::Config { command } => cmd::cmd_config(&cli, &project_dir, command.clone())?,
    }

    Ok(())
}
