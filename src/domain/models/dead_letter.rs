//! Dead letter entries for tasks that exhausted their retry budget.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{AttemptRecord, FailureClass, Task};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub task_id: Uuid,
    /// Ordered attempt outcomes
    pub failure_history: Vec<AttemptRecord>,
    pub classification: FailureClass,
    pub last_error: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEntry {
    /// Build the entry from a task whose last failure has been recorded.
    pub fn from_task(task: &Task, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id,
            failure_history: task.attempts.clone(),
            classification: task.failure_class.unwrap_or(FailureClass::Permanent),
            last_error: task.last_error.clone().unwrap_or_default(),
            dead_lettered_at: now,
        }
    }
}
