//! Command line interface for the brood task engine.

pub mod commands;
pub mod context;
pub mod display;
pub mod id_resolver;
pub mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::infrastructure::{ConfigLoader, LogConfig, LoggerImpl};
use commands::{dlq::DlqArgs, init::InitArgs, swarm::SwarmArgs, task::TaskArgs};

#[derive(Parser, Debug)]
#[command(name = "brood")]
#[command(about = "Brood - durable task queue and agent swarm", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Log at the configured level instead of warnings only
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize brood configuration and database
    Init(InitArgs),
    /// Submit, inspect and cancel tasks
    Task(TaskArgs),
    /// Inspect, retry and purge dead-lettered tasks
    Dlq(DlqArgs),
    /// Run the agent swarm against the queue
    Swarm(SwarmArgs),
}

impl Commands {
    /// Commands that keep running and report through the log.
    fn is_long_running(&self) -> bool {
        matches!(self, Self::Swarm(_))
    }
}

/// Load configuration, install logging and dispatch the parsed command.
pub async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load().context("Failed to load configuration")?;

    let mut log_config = LogConfig::from(&config.logging);
    if !cli.verbose && !cli.command.is_long_running() {
        log_config.level = "warn".to_string();
        log_config.log_dir = None;
    }
    let _logger = LoggerImpl::init(&log_config)?;

    match cli.command {
        Commands::Init(args) => commands::init::execute(args, config, cli.json).await,
        Commands::Task(args) => commands::task::execute(args, config, cli.json).await,
        Commands::Dlq(args) => commands::dlq::execute(args, config, cli.json).await,
        Commands::Swarm(args) => commands::swarm::execute(args, config, cli.json).await,
    }
}

/// Print an error the way the active output mode expects and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "causes": chain,
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_task_submit() {
        let cli = Cli::try_parse_from([
            "brood", "task", "submit", r#"{"command":"true"}"#, "--priority", "7", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Task(_)));
        assert!(!cli.command.is_long_running());
    }

    #[test]
    fn test_swarm_is_long_running() {
        let cli = Cli::try_parse_from(["brood", "swarm", "run", "--agents", "4"]).unwrap();
        assert!(cli.command.is_long_running());
    }
}
