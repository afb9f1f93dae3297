//! Implementation of the `brood swarm` commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::adapters::agents::{CommandAgent, CommandAgentConfig};
use crate::application::{SwarmOrchestrator, SwarmStats};
use crate::cli::context::CliContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;

#[derive(Args, Debug)]
pub struct SwarmArgs {
    #[command(subcommand)]
    pub command: SwarmCommand,
}

#[derive(Subcommand, Debug)]
pub enum SwarmCommand {
    /// Run agent slots against the queue until interrupted
    Run {
        /// Number of concurrent agents; overrides swarm.max_agents
        #[arg(short, long)]
        agents: Option<usize>,

        /// Stop once no task is pending, claimed or running
        #[arg(long)]
        until_idle: bool,

        /// Shell used to run each task's command
        #[arg(long, default_value = "sh")]
        shell: String,

        /// Seconds between SIGTERM and SIGKILL when a task is cancelled
        #[arg(long, default_value = "5")]
        kill_grace_secs: u64,
    },
    /// Return tasks held by dead agents to the queue
    Recover,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub agents: usize,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub agents_crashed: u64,
}

impl From<&SwarmStats> for RunOutput {
    fn from(stats: &SwarmStats) -> Self {
        Self {
            agents: stats.target_agents,
            tasks_processed: stats.tasks_processed,
            tasks_failed: stats.tasks_failed,
            agents_crashed: stats.agents_crashed,
        }
    }
}

impl CommandOutput for RunOutput {
    fn to_human(&self) -> String {
        [
            "Swarm stopped.".to_string(),
            format!("  Agents: {}", self.agents),
            format!("  Tasks processed: {}", self.tasks_processed),
            format!("  Tasks failed: {}", self.tasks_failed),
            format!("  Agent crashes: {}", self.agents_crashed),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RecoverOutput {
    pub recovered: Vec<Uuid>,
}

impl CommandOutput for RecoverOutput {
    fn to_human(&self) -> String {
        if self.recovered.is_empty() {
            return "No stale tasks found.".to_string();
        }
        let mut lines = vec![format!("Recovered {} stale task(s):", self.recovered.len())];
        lines.extend(self.recovered.iter().map(|id| format!("  - {id}")));
        lines.join("\n")
    }
}

pub async fn execute(args: SwarmArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = CliContext::open(config).await?;

    match args.command {
        SwarmCommand::Run {
            agents,
            until_idle,
            shell,
            kill_grace_secs,
        } => {
            let mut swarm_config = ctx.config.swarm.clone();
            if let Some(agents) = agents {
                swarm_config.max_agents = agents;
            }

            let runner = Arc::new(CommandAgent::new(CommandAgentConfig {
                shell,
                heartbeat_interval: swarm_config.heartbeat_interval(),
                kill_grace: Duration::from_secs(kill_grace_secs),
            }));
            let poll_interval = swarm_config.poll_interval();
            let orchestrator = SwarmOrchestrator::new(ctx.coordinator.clone(), runner, swarm_config);

            orchestrator.start().await?;

            if until_idle {
                tokio::select! {
                    result = orchestrator.wait_until_idle(poll_interval) => result?,
                    signal = tokio::signal::ctrl_c() => {
                        signal.context("Failed to listen for interrupt")?;
                        info!("Interrupt received, stopping swarm");
                    }
                }
            } else {
                tokio::signal::ctrl_c()
                    .await
                    .context("Failed to listen for interrupt")?;
                info!("Interrupt received, stopping swarm");
            }

            orchestrator.stop().await?;
            let stats = orchestrator.stats().await;
            output(&RunOutput::from(&stats), json_mode);
        }
        SwarmCommand::Recover => {
            let recovered = ctx
                .coordinator
                .recover_stale()
                .await
                .context("Failed to recover stale tasks")?;
            output(&RecoverOutput { recovered }, json_mode);
        }
    }

    ctx.pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recover_output_empty() {
        let out = RecoverOutput { recovered: vec![] };
        assert_eq!(out.to_human(), "No stale tasks found.");
    }

    #[test]
    fn test_run_output_json_shape() {
        let out = RunOutput {
            agents: 4,
            tasks_processed: 10,
            tasks_failed: 1,
            agents_crashed: 0,
        };
        let value = out.to_json();
        assert_eq!(value["agents"], 4);
        assert_eq!(value["tasks_processed"], 10);
    }
}
