//! Task domain model.
//!
//! Tasks are discrete units of work that agents execute.
//! They form a DAG with dependencies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for dependencies, backoff, or a free slot
    #[default]
    Pending,
    /// Exclusively owned by one agent slot, not yet started
    Claimed,
    /// Currently being executed by an agent
    Running,
    /// Completed successfully
    Completed,
    /// Execution failed; the coordinator immediately decides retry or dead letter
    Failed,
    /// Retry budget exhausted or failure was non-retryable
    DeadLettered,
    /// Cancelled on request
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "claimed" => Some(Self::Claimed),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "dead_lettered" | "dead-lettered" | "deadlettered" => Some(Self::DeadLettered),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered | Self::Cancelled)
    }

    /// Check if this is an active (non-terminal) state.
    ///
    /// `Failed` is never persisted as a resting state, so it counts as active.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Terminal states from which a dependent can never become ready.
    pub fn blocks_dependents(&self) -> bool {
        matches!(self, Self::DeadLettered | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<TaskStatus> {
        match self {
            // Pending -> Failed only happens through dependency propagation
            Self::Pending => vec![Self::Claimed, Self::Failed, Self::Cancelled],
            // -> Pending is the crash recovery sweep
            Self::Claimed => vec![Self::Running, Self::Pending, Self::Cancelled],
            Self::Running => vec![
                Self::Completed,
                Self::Failed,
                Self::Pending,
                Self::Cancelled,
            ],
            Self::Failed => vec![Self::Pending, Self::DeadLettered],
            // Manual retry from the dead letter queue
            Self::DeadLettered => vec![Self::Pending],
            Self::Completed | Self::Cancelled => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Agent/API failure worth retrying
    Transient,
    /// Failure that will not go away on retry
    Permanent,
    /// The task itself is malformed
    Validation,
    /// The agent stopped heartbeating or exceeded its time budget
    Timeout,
    /// A dependency was dead-lettered or cancelled
    DependencyFailed,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Validation => "validation",
            Self::Timeout => "timeout",
            Self::DependencyFailed => "dependency_failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "transient" => Some(Self::Transient),
            "permanent" => Some(Self::Permanent),
            "validation" => Some(Self::Validation),
            "timeout" => Some(Self::Timeout),
            "dependency_failed" => Some(Self::DependencyFailed),
            _ => None,
        }
    }

    /// Whether a failure of this class drives the backoff/retry path.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient | Self::Timeout)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One failed execution attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    pub error: String,
    pub classification: FailureClass,
    pub failed_at: DateTime<Utc>,
}

/// A discrete unit of work that can be executed by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Higher is more urgent
    pub priority: i32,
    /// Current status
    pub status: TaskStatus,
    /// Opaque work description handed to the agent
    pub payload: serde_json::Value,
    /// Task IDs that must complete before this one is ready
    pub depends_on: Vec<Uuid>,
    /// Number of retries already scheduled
    pub retry_count: u32,
    /// Maximum retries before dead-lettering
    pub max_retries: u32,
    /// Earliest time the task may be claimed
    pub next_eligible_at: DateTime<Utc>,
    /// Client-supplied deduplication key
    pub dedup_key: Option<String>,
    /// Slot currently holding the claim
    pub claimed_by: Option<String>,
    /// Last heartbeat from the executing agent
    pub heartbeat_at: Option<DateTime<Utc>>,
    /// Result reported on completion
    pub result: Option<serde_json::Value>,
    /// Most recent error message
    pub last_error: Option<String>,
    /// Classification of the most recent failure
    pub failure_class: Option<FailureClass>,
    /// Failure history, oldest first
    pub attempts: Vec<AttemptRecord>,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Version for optimistic locking (0 = not yet stored)
    pub version: u64,
    /// Store insertion order, used as FIFO tie-break
    pub seq: i64,
}

impl Task {
    /// Create a new pending task with the given payload.
    pub fn new(payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            priority: 0,
            status: TaskStatus::default(),
            payload,
            depends_on: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            next_eligible_at: now,
            dedup_key: None,
            claimed_by: None,
            heartbeat_at: None,
            result: None,
            last_error: None,
            failure_class: None,
            attempts: Vec::new(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            version: 0,
            seq: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if !self.depends_on.contains(&task_id) {
            self.depends_on.push(task_id);
        }
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    /// Stamp creation/eligibility times from an injected clock.
    pub fn created_at_time(mut self, now: DateTime<Utc>) -> Self {
        self.created_at = now;
        self.updated_at = now;
        self.next_eligible_at = now;
        self
    }

    /// Move to `new_status`, enforcing the state machine.
    pub fn transition_to(&mut self, new_status: TaskStatus, now: DateTime<Utc>) -> DomainResult<()> {
        if !self.status.can_transition_to(new_status) {
            return Err(DomainError::InvalidTransition {
                task_id: self.id,
                from: self.status,
                to: new_status,
            });
        }
        self.status = new_status;
        self.updated_at = now;
        Ok(())
    }

    /// Record a failed attempt in the history.
    pub fn record_failure(&mut self, error: impl Into<String>, class: FailureClass, now: DateTime<Utc>) {
        let error = error.into();
        let attempt = u32::try_from(self.attempts.len()).unwrap_or(u32::MAX).saturating_add(1);
        self.attempts.push(AttemptRecord {
            attempt,
            error: error.clone(),
            classification: class,
            failed_at: now,
        });
        self.last_error = Some(error);
        self.failure_class = Some(class);
    }

    /// Whether another retry is allowed for a failure of `class`.
    pub fn can_retry(&self, class: FailureClass) -> bool {
        class.is_retryable() && self.retry_count < self.max_retries
    }

    /// Wall time between start and terminal state, if both are known.
    pub fn execution_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// Input accepted by `TaskCoordinator::submit`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmission {
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    #[serde(default)]
    pub dedup_key: Option<String>,
    /// Overrides the configured default when set
    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl TaskSubmission {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        self.depends_on.push(task_id);
        self
    }

    pub fn with_dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip_strings() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Claimed,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::DeadLettered,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::from_str("canceled"), Some(TaskStatus::Cancelled));
        assert_eq!(TaskStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::DeadLettered.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Pending.is_active());
    }

    #[test]
    fn test_state_machine() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Claimed));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Failed));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::DeadLettered));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Cancelled.can_transition_to(TaskStatus::Pending));
    }

    #[test]
    fn test_transition_rejects_invalid_move() {
        let mut task = Task::new(serde_json::json!({}));
        let err = task
            .transition_to(TaskStatus::Completed, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_record_failure_appends_history() {
        let mut task = Task::new(serde_json::json!({}));
        task.record_failure("boom", FailureClass::Transient, Utc::now());
        task.record_failure("bang", FailureClass::Permanent, Utc::now());

        assert_eq!(task.attempts.len(), 2);
        assert_eq!(task.attempts[1].attempt, 2);
        assert_eq!(task.last_error.as_deref(), Some("bang"));
        assert_eq!(task.failure_class, Some(FailureClass::Permanent));
    }

    #[test]
    fn test_can_retry() {
        let mut task = Task::new(serde_json::json!({})).with_max_retries(1);
        assert!(task.can_retry(FailureClass::Transient));
        assert!(task.can_retry(FailureClass::Timeout));
        assert!(!task.can_retry(FailureClass::Validation));
        task.retry_count = 1;
        assert!(!task.can_retry(FailureClass::Transient));
    }

    #[test]
    fn test_with_dependency_deduplicates() {
        let dep = Uuid::new_v4();
        let task = Task::new(serde_json::json!({}))
            .with_dependency(dep)
            .with_dependency(dep);
        assert_eq!(task.depends_on, vec![dep]);
    }
}
