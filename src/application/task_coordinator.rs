use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    slot_claimant, Checkpoint, Config, DeadLetterEntry, EngineEvent, EventKind, FailureClass, Task,
    TaskStatus, TaskSubmission,
};
use crate::domain::ports::{Clock, QueueStore, SystemClock, TaskFilter};
use crate::services::{BackoffPolicy, EventBus};

/// Reason recorded on tasks failed by dependency propagation
pub const DEPENDENCY_UNRESOLVED: &str = "dependency unresolved";

/// Coordinator behaviour knobs, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Retry budget for submissions that do not set their own
    pub default_max_retries: u32,
    /// Whether client dedup keys are honoured by `submit`
    pub dedup_enabled: bool,
    /// Consecutive storage errors before `submit` refuses work; 0 disables
    pub storage_failure_threshold: u32,
    /// Internal retries of an operation that lost an optimistic-locking race
    pub conflict_retries: u32,
    /// Heartbeat silence after which a claimed/running task is recovered
    pub stale_after: chrono::Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_max_retries: config.retry.max_retries,
            dedup_enabled: config.queue.dedup_enabled,
            storage_failure_threshold: config.queue.storage_failure_threshold,
            conflict_retries: config.queue.conflict_retries,
            stale_after: chrono::Duration::seconds(
                i64::try_from(config.recovery.stale_after_secs).unwrap_or(i64::MAX / 1_000),
            ),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Owns the task state machine.
///
/// Every mutation is a read-modify-write of one task followed by a
/// compare-and-swap `put`, so concurrent callers (agent slots, the CLI, a
/// recovery sweep) never need a shared lock. An operation that loses the
/// race is re-run against fresh state up to `conflict_retries` times.
///
/// `Failed` is a decision point, never a resting state: `fail` moves a
/// task to either `Pending` (after backoff) or `DeadLettered` in the same
/// write.
pub struct TaskCoordinator {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    backoff: BackoffPolicy,
    settings: CoordinatorSettings,
    work_available: Arc<Notify>,
    storage_failures: AtomicU32,
}

impl TaskCoordinator {
    pub fn new(store: Arc<dyn QueueStore>, config: &Config) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            events: Arc::new(EventBus::default()),
            backoff: BackoffPolicy::from_config(&config.retry),
            settings: CoordinatorSettings::from_config(config),
            work_available: Arc::new(Notify::new()),
            storage_failures: AtomicU32::new(0),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_settings(mut self, settings: CoordinatorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Signalled whenever new work may have become claimable.
    pub fn work_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.work_available)
    }

    /// Consecutive storage failures observed so far.
    pub fn storage_failures(&self) -> u32 {
        self.storage_failures.load(Ordering::SeqCst)
    }

    pub fn is_intake_halted(&self) -> bool {
        let threshold = self.settings.storage_failure_threshold;
        threshold > 0 && self.storage_failures() >= threshold
    }

    /// Clear the storage failure streak, reopening intake.
    pub fn reset_intake(&self) {
        self.storage_failures.store(0, Ordering::SeqCst);
    }

    // ---- Submission -------------------------------------------------------

    /// Validate and enqueue a task. With dedup enabled, a submission whose
    /// key was seen before returns the existing task's id.
    #[instrument(skip(self, submission), fields(priority = submission.priority))]
    pub async fn submit(&self, submission: TaskSubmission) -> DomainResult<Uuid> {
        let dedup = self.settings.dedup_enabled;
        let result = self.submit_inner(submission, dedup).await;
        self.track(result)
    }

    /// Like `submit`, but always honours the dedup key regardless of config.
    #[instrument(skip(self, submission), fields(dedup_key = ?submission.dedup_key))]
    pub async fn submit_idempotent(&self, submission: TaskSubmission) -> DomainResult<Uuid> {
        let result = self.submit_inner(submission, true).await;
        self.track(result)
    }

    async fn submit_inner(&self, submission: TaskSubmission, dedup: bool) -> DomainResult<Uuid> {
        if self.is_intake_halted() {
            error!(failures = self.storage_failures(), "refusing submission while storage is failing");
            return Err(DomainError::IntakeHalted(self.storage_failures()));
        }

        let dedup_key = match submission.dedup_key {
            Some(key) if key.trim().is_empty() => {
                return Err(DomainError::Validation("dedup key must not be empty".to_string()));
            }
            Some(key) if dedup => Some(key),
            _ => None,
        };

        if let Some(key) = &dedup_key {
            if let Some(existing) = self.store.get_by_dedup_key(key).await? {
                debug!(task_id = %existing.id, dedup_key = %key, "duplicate submission");
                return Ok(existing.id);
            }
        }

        let now = self.clock.now();
        let mut task = Task::new(submission.payload)
            .with_priority(submission.priority)
            .with_max_retries(submission.max_retries.unwrap_or(self.settings.default_max_retries))
            .created_at_time(now);
        for dep_id in submission.depends_on {
            task = task.with_dependency(dep_id);
        }
        task.dedup_key = dedup_key;

        for dep_id in &task.depends_on {
            let dependency = self
                .store
                .get(*dep_id)
                .await?
                .ok_or_else(|| DomainError::Validation(format!("unknown dependency {dep_id}")))?;
            if dependency.status.blocks_dependents() {
                return Err(DomainError::DependencyFailed {
                    task_id: task.id,
                    dependency: *dep_id,
                });
            }
        }

        let stored = match self.store.put(&task).await {
            Ok(stored) => stored,
            Err(e) if e.is_conflict() => {
                // Lost an insert race on the dedup key
                if let Some(key) = &task.dedup_key {
                    if let Some(existing) = self.store.get_by_dedup_key(key).await? {
                        return Ok(existing.id);
                    }
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        self.events
            .publish(EngineEvent::new(EventKind::Submitted, now).for_task(stored.id));
        info!(task_id = %stored.id, priority = stored.priority, deps = stored.depends_on.len(), "task submitted");

        // A dependency may have been dead-lettered or cancelled between the
        // check above and the insert; its propagation pass could have missed us.
        for dep_id in &stored.depends_on {
            let blocked = self
                .store
                .get(*dep_id)
                .await?
                .is_some_and(|dep| dep.status.blocks_dependents());
            if blocked {
                self.propagate_dependency_failure(*dep_id).await?;
                break;
            }
        }

        self.work_available.notify_one();
        Ok(stored.id)
    }

    // ---- Dispatch ---------------------------------------------------------

    /// Atomically claim up to `limit` ready tasks for a slot.
    #[instrument(skip(self))]
    pub async fn claim(&self, slot_id: u32, limit: usize) -> DomainResult<Vec<Task>> {
        let now = self.clock.now();
        let result = self.store.get_ready(limit, now, &slot_claimant(slot_id)).await;
        let tasks = self.track(result)?;

        for task in &tasks {
            self.events.publish(
                EngineEvent::new(EventKind::Claimed, now)
                    .for_task(task.id)
                    .on_slot(slot_id)
                    .with_duration(now - task.created_at),
            );
        }
        Ok(tasks)
    }

    /// Claimed → Running.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn start(&self, task_id: Uuid) -> DomainResult<Task> {
        let result = self
            .retry_on_conflict("start", || self.start_once(task_id))
            .await;
        self.track(result)
    }

    async fn start_once(&self, task_id: Uuid) -> DomainResult<Task> {
        let now = self.clock.now();
        let mut task = self.load(task_id).await?;
        task.transition_to(TaskStatus::Running, now)?;
        task.started_at = Some(now);
        task.heartbeat_at = Some(now);

        let stored = self.store.put(&task).await?;
        let mut event = EngineEvent::new(EventKind::Started, now).for_task(task_id);
        if let Some(slot_id) = claimant_slot(stored.claimed_by.as_deref()) {
            event = event.on_slot(slot_id);
        }
        self.events.publish(event);
        Ok(stored)
    }

    /// Claimed → Pending. Hands back a claim whose task never started, so
    /// it can be claimed again without waiting for the stale sweep. Does
    /// not consume retry budget.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn release(&self, task_id: Uuid) -> DomainResult<Task> {
        let result = self
            .retry_on_conflict("release", || self.release_once(task_id))
            .await;
        self.track(result)
    }

    async fn release_once(&self, task_id: Uuid) -> DomainResult<Task> {
        let now = self.clock.now();
        let mut task = self.load(task_id).await?;
        if task.status != TaskStatus::Claimed {
            return Err(DomainError::InvalidTransition {
                task_id,
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        task.transition_to(TaskStatus::Pending, now)?;
        task.claimed_by = None;
        task.heartbeat_at = None;
        task.next_eligible_at = now;

        let stored = self.store.put(&task).await?;
        info!(task_id = %task_id, "claim released");
        self.work_available.notify_one();
        Ok(stored)
    }

    /// Running → Completed. A late outcome for a cancelled task is discarded.
    #[instrument(skip(self, result), fields(task_id = %task_id))]
    pub async fn complete(&self, task_id: Uuid, result: serde_json::Value) -> DomainResult<Task> {
        let outcome = self
            .retry_on_conflict("complete", || self.complete_once(task_id, &result))
            .await;
        self.track(outcome)
    }

    async fn complete_once(&self, task_id: Uuid, result: &serde_json::Value) -> DomainResult<Task> {
        let now = self.clock.now();
        let mut task = self.load(task_id).await?;
        if task.status == TaskStatus::Cancelled {
            debug!(task_id = %task_id, "discarding result of cancelled task");
            return Ok(task);
        }

        task.transition_to(TaskStatus::Completed, now)?;
        task.result = Some(result.clone());
        task.completed_at = Some(now);

        let stored = self.store.put(&task).await?;
        let mut event = EngineEvent::new(EventKind::Completed, now).for_task(task_id);
        if let Some(duration) = stored.execution_duration() {
            event = event.with_duration(duration);
        }
        self.events.publish(event);
        info!(task_id = %task_id, retries = stored.retry_count, "task completed");

        // Dependents may have just become ready
        self.work_available.notify_waiters();
        Ok(stored)
    }

    /// Running → Failed → Pending (retry after backoff) or DeadLettered.
    #[instrument(skip(self, error), fields(task_id = %task_id, class = %class))]
    pub async fn fail(&self, task_id: Uuid, error: &str, class: FailureClass) -> DomainResult<Task> {
        let result = self
            .retry_on_conflict("fail", || self.fail_once(task_id, error, class))
            .await;
        self.track(result)
    }

    async fn fail_once(&self, task_id: Uuid, error: &str, class: FailureClass) -> DomainResult<Task> {
        let now = self.clock.now();
        let mut task = self.load(task_id).await?;
        if task.status == TaskStatus::Cancelled {
            debug!(task_id = %task_id, "discarding failure of cancelled task");
            return Ok(task);
        }

        task.transition_to(TaskStatus::Failed, now)?;
        task.record_failure(error, class, now);
        let execution_time = task.started_at.map(|started| now - started);

        if task.can_retry(class) {
            task.retry_count += 1;
            task.next_eligible_at = self.backoff.next_eligible_at(now, task.retry_count);
            task.claimed_by = None;
            task.heartbeat_at = None;
            task.started_at = None;
            task.transition_to(TaskStatus::Pending, now)?;

            let stored = self.store.put(&task).await?;
            let delay = stored.next_eligible_at - now;
            let mut event = EngineEvent::new(EventKind::Failed, now)
                .for_task(task_id)
                .with_detail(format!(
                    "{class}: {error} (retry {}/{} in {}s)",
                    stored.retry_count,
                    stored.max_retries,
                    delay.num_seconds()
                ));
            if let Some(duration) = execution_time {
                event = event.with_duration(duration);
            }
            self.events.publish(event);
            warn!(
                task_id = %task_id,
                retry = stored.retry_count,
                max_retries = stored.max_retries,
                delay_secs = delay.num_seconds(),
                "task failed, retry scheduled"
            );
            return Ok(stored);
        }

        let mut event = EngineEvent::new(EventKind::Failed, now)
            .for_task(task_id)
            .with_detail(format!("{class}: {error}"));
        if let Some(duration) = execution_time {
            event = event.with_duration(duration);
        }
        self.events.publish(event);

        let stored = self.move_to_dead_letter(task, now).await?;
        self.propagate_dependency_failure(task_id).await?;
        Ok(stored)
    }

    /// Any non-terminal state → Cancelled. Cancelling a terminal task is a no-op.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn cancel(&self, task_id: Uuid) -> DomainResult<Task> {
        let result = self
            .retry_on_conflict("cancel", || self.cancel_once(task_id))
            .await;
        let task = self.track(result)?;
        if task.status == TaskStatus::Cancelled {
            self.propagate_dependency_failure(task_id).await?;
        }
        Ok(task)
    }

    async fn cancel_once(&self, task_id: Uuid) -> DomainResult<Task> {
        let now = self.clock.now();
        let mut task = self.load(task_id).await?;
        if task.status.is_terminal() {
            debug!(task_id = %task_id, status = %task.status, "cancel of terminal task ignored");
            return Ok(task);
        }

        task.transition_to(TaskStatus::Cancelled, now)?;
        task.completed_at = Some(now);
        let stored = self.store.put(&task).await?;

        let mut event = EngineEvent::new(EventKind::Cancelled, now).for_task(task_id);
        if let Some(slot_id) = claimant_slot(stored.claimed_by.as_deref()) {
            event = event.on_slot(slot_id);
        }
        self.events.publish(event);
        info!(task_id = %task_id, "task cancelled");
        Ok(stored)
    }

    /// Record an agent heartbeat. Returns false once the task is no longer
    /// claimed or running, e.g. after a cancel from another process.
    pub async fn heartbeat(&self, task_id: Uuid) -> DomainResult<bool> {
        let result = self.store.touch_heartbeat(task_id, self.clock.now()).await;
        self.track(result)
    }

    /// Reset claimed/running tasks with stale heartbeats to Pending.
    /// Recovery does not consume retry budget.
    #[instrument(skip(self))]
    pub async fn recover_stale(&self) -> DomainResult<Vec<Uuid>> {
        let now = self.clock.now();
        let result = self
            .store
            .recover_stale(now - self.settings.stale_after, now)
            .await;
        let recovered = self.track(result)?;

        for task_id in &recovered {
            self.events
                .publish(EngineEvent::new(EventKind::Recovered, now).for_task(*task_id));
        }
        if !recovered.is_empty() {
            warn!(count = recovered.len(), "recovered stale tasks");
            self.work_available.notify_waiters();
        }
        Ok(recovered)
    }

    // ---- Dead letter queue --------------------------------------------------

    /// Re-enqueue a dead-lettered task with a fresh retry budget.
    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn retry_dead_letter(&self, task_id: Uuid) -> DomainResult<Task> {
        let result = self
            .retry_on_conflict("retry_dead_letter", || self.retry_dead_letter_once(task_id))
            .await;
        self.track(result)
    }

    async fn retry_dead_letter_once(&self, task_id: Uuid) -> DomainResult<Task> {
        let now = self.clock.now();
        let mut task = self.load(task_id).await?;
        if task.status != TaskStatus::DeadLettered {
            return Err(DomainError::InvalidTransition {
                task_id,
                from: task.status,
                to: TaskStatus::Pending,
            });
        }

        for dep_id in &task.depends_on {
            let blocked = self
                .store
                .get(*dep_id)
                .await?
                .is_some_and(|dep| dep.status.blocks_dependents());
            if blocked {
                return Err(DomainError::DependencyFailed {
                    task_id,
                    dependency: *dep_id,
                });
            }
        }

        task.transition_to(TaskStatus::Pending, now)?;
        task.retry_count = 0;
        task.next_eligible_at = now;
        task.claimed_by = None;
        task.heartbeat_at = None;
        task.started_at = None;
        task.completed_at = None;

        let stored = self.store.revive(&task).await?;
        self.events
            .publish(EngineEvent::new(EventKind::Retried, now).for_task(task_id));
        info!(task_id = %task_id, "task re-enqueued from dead letter queue");
        self.work_available.notify_one();
        Ok(stored)
    }

    pub async fn dead_letter(&self, task_id: Uuid) -> DomainResult<DeadLetterEntry> {
        self.store
            .get_dead_letter(task_id)
            .await?
            .ok_or(DomainError::DeadLetterNotFound(task_id))
    }

    pub async fn list_dead_letters(&self, limit: usize) -> DomainResult<Vec<DeadLetterEntry>> {
        self.store.list_dead_letters(limit).await
    }

    /// Drop a dead-letter entry. The task itself stays DeadLettered.
    pub async fn purge_dead_letter(&self, task_id: Uuid) -> DomainResult<()> {
        if self.store.purge_dead_letter(task_id).await? {
            info!(task_id = %task_id, "dead letter purged");
            Ok(())
        } else {
            Err(DomainError::DeadLetterNotFound(task_id))
        }
    }

    // ---- Loop checkpoints ---------------------------------------------------

    /// Persist the latest checkpoint of a loop, replacing the previous one.
    #[instrument(skip(self, checkpoint), fields(loop_id = %checkpoint.loop_id, iteration = checkpoint.iteration))]
    pub async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        let result = self.store.save_checkpoint(checkpoint).await;
        self.track(result)?;

        let mut event = EngineEvent::new(EventKind::CheckpointSaved, checkpoint.saved_at).with_detail(format!(
            "loop {} iteration {} {}",
            checkpoint.loop_id, checkpoint.iteration, checkpoint.status
        ));
        if let Some(task_id) = checkpoint.last_task_id {
            event = event.for_task(task_id);
        }
        self.events.publish(event);
        Ok(())
    }

    pub async fn latest_checkpoint(&self, loop_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let result = self.store.load_latest_checkpoint(loop_id).await;
        self.track(result)
    }

    // ---- Queries ----------------------------------------------------------

    pub async fn get(&self, task_id: Uuid) -> DomainResult<Task> {
        self.load(task_id).await
    }

    pub async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        self.store.list(filter).await
    }

    pub async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>> {
        self.store.count_by_status().await
    }

    /// Wait until a task reaches a terminal state. Wakes on engine events
    /// and re-reads the store at least every `poll_interval`.
    pub async fn wait_for_terminal(&self, task_id: Uuid, poll_interval: Duration) -> DomainResult<Task> {
        let mut rx = self.events.subscribe();
        loop {
            let task = self.load(task_id).await?;
            if task.status.is_terminal() {
                return Ok(task);
            }

            let deadline = tokio::time::sleep(poll_interval);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = &mut deadline => break,
                    received = rx.recv() => match received {
                        Ok(event) if event.task_id == Some(task_id) && event.kind.is_terminal() => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(_)) => break,
                        Err(RecvError::Closed) => {
                            (&mut deadline).await;
                            break;
                        }
                    },
                }
            }
        }
    }

    // ---- Internals ----------------------------------------------------------

    async fn load(&self, task_id: Uuid) -> DomainResult<Task> {
        self.store
            .get(task_id)
            .await?
            .ok_or(DomainError::TaskNotFound(task_id))
    }

    async fn move_to_dead_letter(&self, mut task: Task, now: DateTime<Utc>) -> DomainResult<Task> {
        task.transition_to(TaskStatus::DeadLettered, now)?;
        task.completed_at = Some(now);
        let entry = DeadLetterEntry::from_task(&task, now);

        let stored = self.store.dead_letter(&task, &entry).await?;
        self.events.publish(
            EngineEvent::new(EventKind::DeadLettered, now)
                .for_task(stored.id)
                .with_detail(format!("{}: {}", entry.classification, entry.last_error)),
        );
        warn!(
            task_id = %stored.id,
            classification = %entry.classification,
            attempts = entry.failure_history.len(),
            "task dead-lettered"
        );
        Ok(stored)
    }

    /// Fail every non-terminal transitive dependent of `root` non-retryably.
    async fn propagate_dependency_failure(&self, root: Uuid) -> DomainResult<()> {
        let mut stack = vec![root];
        while let Some(dep_id) = stack.pop() {
            for dependent in self.store.get_dependents(dep_id).await? {
                if dependent.status.is_terminal() {
                    continue;
                }
                let failed = self
                    .retry_on_conflict("propagate", || self.fail_dependent(dependent.id, dep_id))
                    .await?;
                if failed {
                    stack.push(dependent.id);
                }
            }
        }
        Ok(())
    }

    async fn fail_dependent(&self, task_id: Uuid, dependency: Uuid) -> DomainResult<bool> {
        let now = self.clock.now();
        let task = self.load(task_id).await?;
        if task.status != TaskStatus::Pending {
            return Ok(false);
        }
        let dep_status = self
            .store
            .get(dependency)
            .await?
            .map_or(TaskStatus::Cancelled, |dep| dep.status);

        let mut task = task;
        task.transition_to(TaskStatus::Failed, now)?;
        let reason = format!("{DEPENDENCY_UNRESOLVED}: {dependency} is {dep_status}");
        task.record_failure(reason.as_str(), FailureClass::DependencyFailed, now);
        self.events.publish(
            EngineEvent::new(EventKind::Failed, now)
                .for_task(task_id)
                .with_detail(reason),
        );
        self.move_to_dead_letter(task, now).await?;
        Ok(true)
    }

    async fn retry_on_conflict<T, F, Fut>(&self, operation: &str, mut op: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(e) if e.is_conflict() && attempt < self.settings.conflict_retries => {
                    attempt += 1;
                    debug!(operation, attempt, "optimistic lock conflict, retrying");
                    tokio::task::yield_now().await;
                }
                other => return other,
            }
        }
    }

    /// Maintain the consecutive storage failure streak.
    fn track<T>(&self, result: DomainResult<T>) -> DomainResult<T> {
        match &result {
            Ok(_) => self.storage_failures.store(0, Ordering::SeqCst),
            Err(e) if e.is_storage() => {
                let failures = self.storage_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let threshold = self.settings.storage_failure_threshold;
                if threshold > 0 && failures == threshold {
                    error!(failures, "storage failing repeatedly, halting intake");
                } else {
                    warn!(failures, error = %e, "storage error");
                }
            }
            Err(_) => {}
        }
        result
    }
}

/// Slot id encoded in a `slot-<n>` claimant.
fn claimant_slot(claimant: Option<&str>) -> Option<u32> {
    claimant?.strip_prefix("slot-")?.parse().ok()
}
