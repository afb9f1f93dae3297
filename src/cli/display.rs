//! Table rendering for list commands, built on comfy-table.

use comfy_table::{presets, Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use std::collections::HashMap;
use std::env;

use crate::cli::output::truncate;
use crate::domain::models::{DeadLetterEntry, Task, TaskStatus};

const ALL_STATUSES: [TaskStatus; 7] = [
    TaskStatus::Pending,
    TaskStatus::Claimed,
    TaskStatus::Running,
    TaskStatus::Completed,
    TaskStatus::Failed,
    TaskStatus::DeadLettered,
    TaskStatus::Cancelled,
];

/// Create a borderless list table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| {
            Cell::new(h.to_uppercase())
                .set_alignment(CellAlignment::Left)
                .add_attribute(Attribute::Bold)
        }));
    table
}

/// Render the table under a count line, or a "No X found." message.
pub fn render_list(entity_name: &str, table: &Table, total: usize) -> String {
    if total == 0 {
        return format!("No {entity_name}s found.");
    }
    let noun = if total == 1 {
        entity_name.to_string()
    } else {
        format!("{entity_name}s")
    };
    format!("{total} {noun}:\n{table}")
}

pub fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

fn supports_color() -> bool {
    if env::var_os("NO_COLOR").is_some() {
        return false;
    }
    !matches!(env::var("TERM").as_deref(), Ok("dumb"))
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Pending => Color::White,
        TaskStatus::Claimed => Color::Yellow,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Completed => Color::Green,
        TaskStatus::Failed | TaskStatus::DeadLettered => Color::Red,
        TaskStatus::Cancelled => Color::DarkGrey,
    }
}

fn status_cell(status: TaskStatus) -> Cell {
    let cell = Cell::new(status.as_str());
    if supports_color() {
        cell.fg(status_color(status))
    } else {
        cell
    }
}

pub fn task_table(tasks: &[Task]) -> String {
    let mut table = list_table(&["id", "status", "priority", "retries", "deps", "payload", "updated"]);
    for task in tasks {
        table.add_row(vec![
            Cell::new(short_id(&task.id)),
            status_cell(task.status),
            Cell::new(task.priority).set_alignment(CellAlignment::Right),
            Cell::new(format!("{}/{}", task.retry_count, task.max_retries)),
            Cell::new(task.depends_on.len()),
            Cell::new(truncate(&task.payload.to_string(), 48)),
            Cell::new(task.updated_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    render_list("task", &table, tasks.len())
}

pub fn dead_letter_table(entries: &[DeadLetterEntry]) -> String {
    let mut table = list_table(&["task", "class", "attempts", "last error", "dead-lettered"]);
    for entry in entries {
        table.add_row(vec![
            Cell::new(short_id(&entry.task_id)),
            Cell::new(entry.classification.as_str()),
            Cell::new(entry.failure_history.len()),
            Cell::new(truncate(&entry.last_error, 60)),
            Cell::new(entry.dead_lettered_at.format("%Y-%m-%d %H:%M:%S")),
        ]);
    }
    render_list("dead letter", &table, entries.len())
}

/// Per-status counts, every status listed even when zero.
pub fn status_counts_table(counts: &HashMap<TaskStatus, u64>) -> String {
    let mut table = list_table(&["status", "count"]);
    for status in ALL_STATUSES {
        table.add_row(vec![
            status_cell(status),
            Cell::new(counts.get(&status).copied().unwrap_or(0)).set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

pub fn ordered_counts(counts: &HashMap<TaskStatus, u64>) -> Vec<(TaskStatus, u64)> {
    ALL_STATUSES
        .iter()
        .map(|status| (*status, counts.get(status).copied().unwrap_or(0)))
        .collect()
}
