//! Implementation of the `brood task` commands.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use crate::cli::context::CliContext;
use crate::cli::display::{ordered_counts, status_counts_table, task_table};
use crate::cli::id_resolver::resolve_task_id;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, Task, TaskStatus, TaskSubmission};
use crate::domain::ports::TaskFilter;

#[derive(Args, Debug)]
pub struct TaskArgs {
    #[command(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Submit a new task
    Submit {
        /// Task payload as JSON, e.g. '{"command": "make test"}'
        payload: String,

        /// Higher runs first
        #[arg(short, long, default_value = "0", allow_negative_numbers = true)]
        priority: i32,

        /// Task ID (or unique prefix) that must complete first; repeatable
        #[arg(short, long = "depends-on")]
        depends_on: Vec<String>,

        /// Deduplication key; resubmitting the same key returns the existing task
        #[arg(long)]
        dedup_key: Option<String>,

        /// Retry budget; defaults to the configured value
        #[arg(long)]
        max_retries: Option<u32>,

        /// Block until the task reaches a terminal state
        #[arg(short, long)]
        wait: bool,
    },
    /// List tasks by descending priority
    List {
        /// Only tasks in this status
        #[arg(short, long, value_parser = parse_status)]
        status: Option<TaskStatus>,

        /// Only tasks with at least this priority
        #[arg(long, allow_negative_numbers = true)]
        min_priority: Option<i32>,

        #[arg(short, long, default_value = "50")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Show one task in full
    Show {
        /// Task ID or unique prefix
        id: String,
    },
    /// Cancel a task that has not finished
    Cancel {
        /// Task ID or unique prefix
        id: String,
    },
    /// Put a dead-lettered task back on the queue with a fresh retry budget
    Retry {
        /// Task ID or unique prefix
        id: String,
    },
    /// Count tasks per status
    Stats,
}

fn parse_status(s: &str) -> Result<TaskStatus, String> {
    TaskStatus::from_str(s).ok_or_else(|| {
        format!("unknown status '{s}' (pending, claimed, running, completed, failed, dead_lettered, cancelled)")
    })
}

#[derive(Debug, Serialize)]
pub struct SubmitOutput {
    pub task_id: Uuid,
    pub priority: i32,
    pub depends_on: Vec<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
}

impl CommandOutput for SubmitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            "Task submitted.".to_string(),
            format!("  Task ID: {}", self.task_id),
            format!("  Priority: {}", self.priority),
        ];
        if !self.depends_on.is_empty() {
            lines.push(format!("  Dependencies: {} task(s)", self.depends_on.len()));
        }
        if let Some(task) = &self.task {
            lines.push(format!("  Final status: {}", task.status));
            if let Some(result) = &task.result {
                lines.push(format!("  Result: {result}"));
            }
            if let Some(error) = &task.last_error {
                lines.push(format!("  Last error: {error}"));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<Task>,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        task_table(&self.tasks)
    }

    fn to_json(&self) -> Value {
        serde_json::to_value(&self.tasks).unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
pub struct TaskDetailOutput {
    #[serde(flatten)]
    pub task: Task,
}

impl CommandOutput for TaskDetailOutput {
    fn to_human(&self) -> String {
        let task = &self.task;
        let fmt_time = |t: chrono::DateTime<chrono::Utc>| t.format("%Y-%m-%d %H:%M:%S UTC").to_string();

        let mut lines = vec![
            "Task Details:".to_string(),
            format!("  ID: {}", task.id),
            format!("  Status: {}", task.status),
            format!("  Priority: {}", task.priority),
            format!("  Retries: {}/{}", task.retry_count, task.max_retries),
            format!("  Payload: {}", task.payload),
            format!("  Created at: {}", fmt_time(task.created_at)),
            format!("  Updated at: {}", fmt_time(task.updated_at)),
        ];
        if task.status == TaskStatus::Pending && task.retry_count > 0 {
            lines.push(format!("  Next eligible: {}", fmt_time(task.next_eligible_at)));
        }
        if let Some(key) = &task.dedup_key {
            lines.push(format!("  Dedup key: {key}"));
        }
        if !task.depends_on.is_empty() {
            lines.push("  Depends on:".to_string());
            for dep in &task.depends_on {
                lines.push(format!("    - {dep}"));
            }
        }
        if let Some(claimant) = &task.claimed_by {
            lines.push(format!("  Claimed by: {claimant}"));
        }
        if let Some(started) = task.started_at {
            lines.push(format!("  Started at: {}", fmt_time(started)));
        }
        if let Some(done) = task.completed_at {
            lines.push(format!("  Finished at: {}", fmt_time(done)));
        }
        if let Some(duration) = task.execution_duration() {
            lines.push(format!("  Duration: {}ms", duration.num_milliseconds()));
        }
        if let Some(result) = &task.result {
            lines.push(format!("  Result: {result}"));
        }
        if let Some(error) = &task.last_error {
            let class = task.failure_class.map_or("unknown", |c| c.as_str());
            lines.push(format!("  Last error ({class}): {error}"));
        }
        if !task.attempts.is_empty() {
            lines.push("  Failed attempts:".to_string());
            for attempt in &task.attempts {
                lines.push(format!(
                    "    #{} [{}] {} at {}",
                    attempt.attempt,
                    attempt.classification,
                    attempt.error,
                    fmt_time(attempt.failed_at)
                ));
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct RetryOutput {
    pub task_id: Uuid,
    pub status: String,
    pub max_retries: u32,
}

impl From<&Task> for RetryOutput {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            status: task.status.to_string(),
            max_retries: task.max_retries,
        }
    }
}

impl CommandOutput for RetryOutput {
    fn to_human(&self) -> String {
        format!(
            "Task {} requeued as {} with {} retries available.",
            self.task_id, self.status, self.max_retries
        )
    }
}

#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub total: u64,
    pub by_status: HashMap<TaskStatus, u64>,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        format!("{}\nTotal: {}", status_counts_table(&self.by_status), self.total)
    }

    fn to_json(&self) -> Value {
        let by_status: serde_json::Map<String, Value> = ordered_counts(&self.by_status)
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), Value::from(count)))
            .collect();
        serde_json::json!({ "total": self.total, "by_status": by_status })
    }
}

pub async fn execute(args: TaskArgs, config: Config, json_mode: bool) -> Result<()> {
    let ctx = CliContext::open(config).await?;

    match args.command {
        TaskCommand::Submit {
            payload,
            priority,
            depends_on,
            dedup_key,
            max_retries,
            wait,
        } => {
            let payload: Value = serde_json::from_str(&payload).context("Payload must be valid JSON")?;

            let mut dependencies = Vec::with_capacity(depends_on.len());
            for prefix in &depends_on {
                dependencies.push(resolve_task_id(&ctx.pool, prefix).await?);
            }

            let submission = TaskSubmission {
                payload,
                priority,
                depends_on: dependencies.clone(),
                dedup_key,
                max_retries,
            };
            let task_id = ctx
                .coordinator
                .submit(submission)
                .await
                .context("Failed to submit task")?;

            let task = if wait {
                let poll = Duration::from_millis(ctx.config.loops.poll_interval_ms);
                Some(
                    ctx.coordinator
                        .wait_for_terminal(task_id, poll)
                        .await
                        .context("Failed while waiting for task")?,
                )
            } else {
                None
            };

            output(
                &SubmitOutput {
                    task_id,
                    priority,
                    depends_on: dependencies,
                    task,
                },
                json_mode,
            );
        }
        TaskCommand::List {
            status,
            min_priority,
            limit,
            offset,
        } => {
            let filter = TaskFilter {
                status,
                min_priority,
                ..TaskFilter::default()
            }
            .page(limit, offset);
            let tasks = ctx.coordinator.list(filter).await.context("Failed to list tasks")?;
            output(&TaskListOutput { tasks }, json_mode);
        }
        TaskCommand::Show { id } => {
            let task_id = resolve_task_id(&ctx.pool, &id).await?;
            let task = ctx
                .coordinator
                .get(task_id)
                .await
                .map_err(|e| anyhow!("{e}. Use 'brood task list' to see available tasks."))?;
            output(&TaskDetailOutput { task }, json_mode);
        }
        TaskCommand::Cancel { id } => {
            let task_id = resolve_task_id(&ctx.pool, &id).await?;
            let task = ctx
                .coordinator
                .cancel(task_id)
                .await
                .with_context(|| format!("Failed to cancel task {task_id}"))?;
            output(&TaskDetailOutput { task }, json_mode);
        }
        TaskCommand::Retry { id } => {
            let task_id = resolve_task_id(&ctx.pool, &id).await?;
            let task = ctx
                .coordinator
                .retry_dead_letter(task_id)
                .await
                .with_context(|| format!("Failed to retry task {task_id}"))?;
            output(&RetryOutput::from(&task), json_mode);
        }
        TaskCommand::Stats => {
            let by_status = ctx
                .coordinator
                .count_by_status()
                .await
                .context("Failed to count tasks")?;
            let total = by_status.values().sum();
            output(&StatsOutput { total, by_status }, json_mode);
        }
    }

    ctx.pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("dead_lettered").unwrap(), TaskStatus::DeadLettered);
        assert!(parse_status("sleeping").is_err());
    }

    #[test]
    fn test_retry_output_from_task() {
        let task = Task::new(json!({}));
        let out = RetryOutput::from(&task);
        assert_eq!(out.status, TaskStatus::Pending.as_str());
        assert_eq!(out.to_json()["task_id"], json!(task.id));
    }

    #[test]
    fn test_stats_json_lists_every_status() {
        let stats = StatsOutput {
            total: 3,
            by_status: HashMap::from([(TaskStatus::Pending, 2), (TaskStatus::Completed, 1)]),
        };
        let value = stats.to_json();
        assert_eq!(value["total"], 3);
        assert_eq!(value["by_status"]["pending"], 2);
        assert_eq!(value["by_status"]["cancelled"], 0);
    }

    #[test]
    fn test_detail_shows_attempt_history() {
        let mut task = Task::new(json!({"command": "false"}));
        task.record_failure("exit 1", crate::domain::models::FailureClass::Transient, chrono::Utc::now());
        let human = TaskDetailOutput { task }.to_human();
        assert!(human.contains("Failed attempts:"));
        assert!(human.contains("exit 1"));
    }
}
