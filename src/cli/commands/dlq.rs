//! Implementation of the `brood dlq` commands.
//!
//! Dead-lettered tasks are re-enqueued with `brood task retry`.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::cli::context::CliContext;
use crate::cli::display::dead_letter_table;
use crate::cli::id_resolver::resolve_dead_letter_id;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, DeadLetterEntry};

#[derive(Args, Debug)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub command: DlqCommand,
}

#[derive(Subcommand, Debug)]
pub enum DlqCommand {
    /// List dead-lettered tasks, most recent first
    List {
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Show the failure history of a dead-lettered task
    Show {
        /// Task ID or unique prefix
        id: String,
    },
    /// Remove the dead-letter record; the task itself stays dead-lettered
    Purge {
        /// Task ID or unique prefix
        id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct DeadLetterListOutput {
    pub entries: Vec<DeadLetterEntry>,
}

impl CommandOutput for DeadLetterListOutput {
    fn to_human(&self) -> String {
        dead_letter_table(&self.entries)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(&self.entries).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct DeadLetterDetailOutput {
    #[serde(flatten)]
    pub entry: DeadLetterEntry,
}

impl CommandOutput for DeadLetterDetailOutput {
    fn to_human(&self) -> String {
        let entry = &self.entry;
        let mut lines = vec![
            "Dead Letter:".to_string(),
            format!("  Task ID: {}", entry.task_id),
            format!("  Classification: {}", entry.classification),
            format!("  Last error: {}", entry.last_error),
            format!(
                "  Dead-lettered at: {}",
                entry.dead_lettered_at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            format!("  Attempts: {}", entry.failure_history.len()),
        ];
        for attempt in &entry.failure_history {
            lines.push(format!(
                "    #{} [{}] {}",
                attempt.attempt, attempt.classification, attempt.error
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PurgeOutput {
    pub task_id: Uuid,
    pub purged: bool,
}

impl CommandOutput for PurgeOutput {
    fn to_human(&self) -> String {
        format!("Dead-letter record for {} purged.", self.task_id)
    }
}

pub async fn execute(args: DlqArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = CliContext::open(config).await?;

    match args.command {
        DlqCommand::List { limit } => {
            let entries = ctx
                .coordinator
                .list_dead_letters(limit)
                .await
                .context("Failed to list dead letters")?;
            output(&DeadLetterListOutput { entries }, json_mode);
        }
        DlqCommand::Show { id } => {
            let task_id = resolve_dead_letter_id(&ctx.pool, &id).await?;
            let entry = ctx
                .coordinator
                .dead_letter(task_id)
                .await
                .with_context(|| format!("No dead letter for task {task_id}"))?;
            output(&DeadLetterDetailOutput { entry }, json_mode);
        }
        DlqCommand::Purge { id } => {
            let task_id = resolve_dead_letter_id(&ctx.pool, &id).await?;
            ctx.coordinator
                .purge_dead_letter(task_id)
                .await
                .with_context(|| format!("Failed to purge dead letter {task_id}"))?;
            output(&PurgeOutput { task_id, purged: true }, json_mode);
        }
    }

    ctx.pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{FailureClass, Task};
    use serde_json::json;

    #[test]
    fn test_detail_lists_each_attempt() {
        let mut task = Task::new(json!({}));
        let now = chrono::Utc::now();
        task.record_failure("first", FailureClass::Transient, now);
        task.record_failure("second", FailureClass::Permanent, now);
        let entry = DeadLetterEntry::from_task(&task, now);

        let human = DeadLetterDetailOutput { entry }.to_human();
        assert!(human.contains("Classification: permanent"));
        assert!(human.contains("#1 [transient] first"));
        assert!(human.contains("#2 [permanent] second"));
    }
}
