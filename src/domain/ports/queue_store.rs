use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Checkpoint, DeadLetterEntry, Task, TaskStatus};

/// Filters for querying tasks
#[derive(Default, Debug, Clone)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub min_priority: Option<i32>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl TaskFilter {
    pub fn by_status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn page(mut self, limit: usize, offset: usize) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// Durable, transactional storage for tasks, checkpoints and dead letters.
///
/// Every method is a single atomic operation scoped to one task (plus its
/// dead-letter entry) or one checkpoint. Implementations surface durability
/// failures as `DomainError::Storage` and never leave partial writes visible.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert (`version == 0`) or compare-and-swap update a task.
    ///
    /// Returns the stored task with its new version. An update whose
    /// version no longer matches fails with `DomainError::Conflict`.
    async fn put(&self, task: &Task) -> DomainResult<Task>;

    /// Get a task by ID
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Look up the task submitted with a dedup key
    async fn get_by_dedup_key(&self, key: &str) -> DomainResult<Option<Task>>;

    /// Atomically claim up to `limit` ready tasks for `claimant`.
    ///
    /// Ready means Pending, every dependency Completed and
    /// `next_eligible_at <= now`. Results are ordered by priority
    /// descending, then creation order. A task is never returned to two
    /// callers.
    async fn get_ready(&self, limit: usize, now: DateTime<Utc>, claimant: &str) -> DomainResult<Vec<Task>>;

    /// Tasks that list `task_id` as a dependency
    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Task>>;

    /// List tasks ordered by priority descending, then creation order
    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>>;

    /// Count tasks per status
    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>>;

    /// Record an agent heartbeat for a claimed or running task. Returns
    /// false when the task is no longer claimed or running.
    async fn touch_heartbeat(&self, task_id: Uuid, at: DateTime<Utc>) -> DomainResult<bool>;

    /// Reset Claimed/Running tasks whose heartbeat predates `stale_before`
    /// to Pending. Returns the ids that were reset.
    async fn recover_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<Vec<Uuid>>;

    /// Compare-and-swap the task into DeadLettered and insert its entry,
    /// in one transaction.
    async fn dead_letter(&self, task: &Task, entry: &DeadLetterEntry) -> DomainResult<Task>;

    /// Compare-and-swap the task out of the dead letter queue and delete
    /// its entry, in one transaction.
    async fn revive(&self, task: &Task) -> DomainResult<Task>;

    async fn get_dead_letter(&self, task_id: Uuid) -> DomainResult<Option<DeadLetterEntry>>;

    /// Most recent dead letters first
    async fn list_dead_letters(&self, limit: usize) -> DomainResult<Vec<DeadLetterEntry>>;

    /// Remove a dead-letter entry, leaving the task DeadLettered.
    /// Returns whether an entry existed.
    async fn purge_dead_letter(&self, task_id: Uuid) -> DomainResult<bool>;

    /// Upsert the latest checkpoint of a loop
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()>;

    async fn load_latest_checkpoint(&self, loop_id: Uuid) -> DomainResult<Option<Checkpoint>>;
}
