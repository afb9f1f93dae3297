mod common;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use brood::adapters::agents::{Behavior, ScriptedAgent};
use brood::adapters::sqlite::SqliteQueueStore;
use brood::application::{SwarmOrchestrator, SwarmState, TaskCoordinator};
use brood::domain::models::{
    Checkpoint, Config, DeadLetterEntry, FailureClass, SwarmConfig, Task, TaskStatus, TaskSubmission,
};
use brood::domain::ports::{QueueStore, TaskFilter};
use brood::domain::{DomainError, DomainResult};
use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

const WAIT: Duration = Duration::from_secs(10);

fn swarm_config(max_agents: usize) -> SwarmConfig {
    SwarmConfig {
        max_agents,
        poll_interval_ms: 20,
        heartbeat_timeout_ms: 2_000,
        shutdown_timeout_secs: 5,
        ..SwarmConfig::default()
    }
}

/// Config whose retry delays are short enough to wait for in a test.
fn fast_retry_config() -> Config {
    let mut config = Config::default();
    config.retry.initial_backoff_ms = 20;
    config.retry.max_backoff_ms = 50;
    config
}

async fn status_of(coordinator: &TaskCoordinator, task_id: Uuid) -> TaskStatus {
    coordinator.get(task_id).await.unwrap().status
}

async fn wait_for_status(coordinator: &TaskCoordinator, task_id: Uuid, status: TaskStatus) -> bool {
    common::wait_for(|| async { status_of(coordinator, task_id).await == status }, WAIT).await
}

#[tokio::test]
async fn test_swarm_drains_queue_with_bounded_concurrency() {
    let coordinator = common::live_coordinator(&Config::default()).await;
    let agent = Arc::new(
        ScriptedAgent::new().with_default(Behavior::succeed(json!("ok")).after(Duration::from_millis(80))),
    );

    let mut submitted = HashSet::new();
    for i in 0..12 {
        submitted.insert(coordinator.submit(TaskSubmission::new(json!({ "i": i }))).await.unwrap());
    }

    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(3));
    swarm.start().await.unwrap();
    tokio::time::timeout(WAIT, swarm.wait_until_idle(Duration::from_millis(20)))
        .await
        .expect("swarm did not drain the queue")
        .unwrap();

    let stats = swarm.stats().await;
    assert_eq!(stats.tasks_processed, 12);
    assert_eq!(stats.tasks_failed, 0);
    assert!(agent.peak_concurrency() <= 3);
    assert!(agent.peak_concurrency() >= 2);

    let executed: HashSet<Uuid> = agent.executions().await.iter().map(|e| e.task_id).collect();
    assert_eq!(executed, submitted);
    assert_eq!(agent.executions().await.len(), 12);

    swarm.stop().await.unwrap();
    assert_eq!(swarm.state().await, SwarmState::Stopped);
}

#[tokio::test]
async fn test_silent_agent_is_crashed_and_task_requeued_once() {
    let coordinator = common::live_coordinator(&fast_retry_config()).await;
    let agent = Arc::new(ScriptedAgent::new().with_script([Behavior::Hang]));
    let config = SwarmConfig {
        heartbeat_timeout_ms: 200,
        ..swarm_config(1)
    };

    let task_id = coordinator.submit(TaskSubmission::new(json!({"job": "index"}))).await.unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), config);
    swarm.start().await.unwrap();

    assert!(wait_for_status(&coordinator, task_id, TaskStatus::Completed).await);

    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.retry_count, 1);
    assert_eq!(task.attempts.len(), 1);
    assert_eq!(task.attempts[0].classification, FailureClass::Timeout);

    let stats = swarm.stats().await;
    assert_eq!(stats.agents_crashed, 1);
    assert_eq!(stats.tasks_processed, 1);
    assert_eq!(agent.executions().await.len(), 2);
    // The crashed slot was recycled, not lost
    assert_eq!(stats.slots, 1);

    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_failing_agent_exhausts_retries_into_dead_letter() {
    let coordinator = common::live_coordinator(&fast_retry_config()).await;
    let agent = Arc::new(ScriptedAgent::new().with_default(Behavior::transient("upstream 503")));

    let task_id = coordinator
        .submit(TaskSubmission::new(json!({})).with_max_retries(2))
        .await
        .unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(2));
    swarm.start().await.unwrap();

    assert!(wait_for_status(&coordinator, task_id, TaskStatus::DeadLettered).await);
    swarm.stop().await.unwrap();

    let entry = coordinator.dead_letter(task_id).await.unwrap();
    assert_eq!(entry.failure_history.len(), 3);
    assert_eq!(entry.last_error, "upstream 503");
    assert_eq!(agent.executions().await.len(), 3);
    assert_eq!(swarm.stats().await.tasks_failed, 3);
}

#[tokio::test]
async fn test_cancel_stops_running_task() {
    let coordinator = common::live_coordinator(&Config::default()).await;
    let agent = Arc::new(
        ScriptedAgent::new().with_default(Behavior::succeed(json!("late")).after(Duration::from_secs(30))),
    );

    let task_id = coordinator.submit(TaskSubmission::new(json!({}))).await.unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(1));
    swarm.start().await.unwrap();

    assert!(wait_for_status(&coordinator, task_id, TaskStatus::Running).await);
    assert_eq!(swarm.assignments().await.values().copied().collect::<Vec<_>>(), vec![task_id]);

    coordinator.cancel(task_id).await.unwrap();
    assert!(common::wait_for(|| async { swarm.assignments().await.is_empty() }, WAIT).await);

    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());
    assert!(task.last_error.is_none());

    let stats = swarm.stats().await;
    assert_eq!(stats.tasks_processed, 0);
    assert_eq!(stats.tasks_failed, 0);
    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_resize_grows_and_retires_slots() {
    let coordinator = common::live_coordinator(&Config::default()).await;
    let swarm = SwarmOrchestrator::new(coordinator, Arc::new(ScriptedAgent::new()), swarm_config(2));
    swarm.start().await.unwrap();
    assert_eq!(swarm.slots().await.len(), 2);

    swarm.resize(5).await.unwrap();
    assert_eq!(swarm.slots().await.len(), 5);
    assert_eq!(swarm.stats().await.target_agents, 5);

    swarm.resize(1).await.unwrap();
    assert!(common::wait_for(|| async { swarm.slots().await.len() == 1 }, WAIT).await);

    assert!(swarm.resize(0).await.is_err());
    swarm.stop().await.unwrap();
    assert!(swarm.slots().await.is_empty());
}

#[tokio::test]
async fn test_stop_lets_in_flight_task_finish() {
    let coordinator = common::live_coordinator(&Config::default()).await;
    let agent = Arc::new(
        ScriptedAgent::new().with_default(Behavior::succeed(json!("done")).after(Duration::from_millis(300))),
    );

    let task_id = coordinator.submit(TaskSubmission::new(json!({}))).await.unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent, swarm_config(1));
    swarm.start().await.unwrap();
    assert!(wait_for_status(&coordinator, task_id, TaskStatus::Running).await);

    swarm.stop().await.unwrap();
    assert_eq!(status_of(&coordinator, task_id).await, TaskStatus::Completed);
}

#[tokio::test]
async fn test_start_recovers_tasks_of_a_dead_process() {
    let (coordinator, clock) = common::coordinator().await;
    let task_id = coordinator.submit(TaskSubmission::new(json!({}))).await.unwrap();

    // Claimed by a slot of a process that then died
    coordinator.claim(7, 1).await.unwrap();
    coordinator.start(task_id).await.unwrap();
    clock.advance(chrono::Duration::seconds(61));

    let agent = Arc::new(ScriptedAgent::new());
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(1));
    swarm.start().await.unwrap();

    assert!(wait_for_status(&coordinator, task_id, TaskStatus::Completed).await);
    swarm.stop().await.unwrap();

    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.retry_count, 0);
    assert_eq!(agent.executions().await.len(), 1);
}

#[tokio::test]
async fn test_resize_below_busy_slots_lets_tasks_finish() {
    let coordinator = common::live_coordinator(&Config::default()).await;
    let agent = Arc::new(
        ScriptedAgent::new().with_default(Behavior::succeed(json!("done")).after(Duration::from_millis(300))),
    );

    let first = coordinator.submit(TaskSubmission::new(json!({"n": 1}))).await.unwrap();
    let second = coordinator.submit(TaskSubmission::new(json!({"n": 2}))).await.unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(2));
    swarm.start().await.unwrap();
    assert!(common::wait_for(|| async { swarm.assignments().await.len() == 2 }, WAIT).await);

    swarm.resize(1).await.unwrap();
    let stats = swarm.stats().await;
    assert_eq!(stats.target_agents, 1);
    assert_eq!(stats.slots, 2);
    assert_eq!(stats.busy_agents, 2);
    assert_eq!(stats.terminating_agents, 1);

    assert!(wait_for_status(&coordinator, first, TaskStatus::Completed).await);
    assert!(wait_for_status(&coordinator, second, TaskStatus::Completed).await);
    assert!(common::wait_for(|| async { swarm.slots().await.len() == 1 }, WAIT).await);

    let stats = swarm.stats().await;
    assert_eq!(stats.terminating_agents, 0);
    assert_eq!(stats.tasks_processed, 2);
    assert_eq!(agent.executions().await.len(), 2);
    swarm.stop().await.unwrap();
}

#[tokio::test]
async fn test_cancel_from_another_process_stops_running_task() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.db");
    let config = Config::default();
    let worker_side = Arc::new(TaskCoordinator::new(
        Arc::new(SqliteQueueStore::new(common::file_pool(&path).await)),
        &config,
    ));
    let operator_side = TaskCoordinator::new(
        Arc::new(SqliteQueueStore::new(common::file_pool(&path).await)),
        &config,
    );
    let agent = Arc::new(
        ScriptedAgent::new().with_default(Behavior::succeed(json!("late")).after(Duration::from_secs(30))),
    );

    let task_id = worker_side.submit(TaskSubmission::new(json!({}))).await.unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&worker_side), agent, swarm_config(1));
    swarm.start().await.unwrap();
    assert!(wait_for_status(&worker_side, task_id, TaskStatus::Running).await);

    // Only the database sees this cancel; the swarm's event bus does not
    operator_side.cancel(task_id).await.unwrap();
    assert!(common::wait_for(|| async { swarm.assignments().await.is_empty() }, Duration::from_secs(3)).await);

    let task = worker_side.get(task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(task.result.is_none());

    let stats = swarm.stats().await;
    assert_eq!(stats.tasks_processed, 0);
    assert_eq!(stats.tasks_failed, 0);
    assert_eq!(stats.idle_agents, 1);
    swarm.stop().await.unwrap();
}

/// Store whose next task write, or every heartbeat write, can be made to fail.
struct FlakyStore {
    inner: SqliteQueueStore,
    fail_next_put: AtomicBool,
    fail_heartbeats: AtomicBool,
}

impl FlakyStore {
    async fn new() -> Arc<Self> {
        let pool = brood::adapters::sqlite::create_migrated_test_pool().await.unwrap();
        Arc::new(Self {
            inner: SqliteQueueStore::new(pool),
            fail_next_put: AtomicBool::new(false),
            fail_heartbeats: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl QueueStore for FlakyStore {
    async fn put(&self, task: &Task) -> DomainResult<Task> {
        if self.fail_next_put.swap(false, Ordering::SeqCst) {
            return Err(DomainError::Storage("disk I/O error".to_string()));
        }
        self.inner.put(task).await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        self.inner.get(id).await
    }

    async fn get_by_dedup_key(&self, key: &str) -> DomainResult<Option<Task>> {
        self.inner.get_by_dedup_key(key).await
    }

    async fn get_ready(&self, limit: usize, now: DateTime<Utc>, claimant: &str) -> DomainResult<Vec<Task>> {
        self.inner.get_ready(limit, now, claimant).await
    }

    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Task>> {
        self.inner.get_dependents(task_id).await
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        self.inner.list(filter).await
    }

    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>> {
        self.inner.count_by_status().await
    }

    async fn touch_heartbeat(&self, task_id: Uuid, at: DateTime<Utc>) -> DomainResult<bool> {
        if self.fail_heartbeats.load(Ordering::SeqCst) {
            return Err(DomainError::Storage("database is locked".to_string()));
        }
        self.inner.touch_heartbeat(task_id, at).await
    }

    async fn recover_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<Vec<Uuid>> {
        self.inner.recover_stale(stale_before, now).await
    }

    async fn dead_letter(&self, task: &Task, entry: &DeadLetterEntry) -> DomainResult<Task> {
        self.inner.dead_letter(task, entry).await
    }

    async fn revive(&self, task: &Task) -> DomainResult<Task> {
        self.inner.revive(task).await
    }

    async fn get_dead_letter(&self, task_id: Uuid) -> DomainResult<Option<DeadLetterEntry>> {
        self.inner.get_dead_letter(task_id).await
    }

    async fn list_dead_letters(&self, limit: usize) -> DomainResult<Vec<DeadLetterEntry>> {
        self.inner.list_dead_letters(limit).await
    }

    async fn purge_dead_letter(&self, task_id: Uuid) -> DomainResult<bool> {
        self.inner.purge_dead_letter(task_id).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        self.inner.save_checkpoint(checkpoint).await
    }

    async fn load_latest_checkpoint(&self, loop_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        self.inner.load_latest_checkpoint(loop_id).await
    }
}

#[tokio::test]
async fn test_failed_start_releases_claim_for_another_try() {
    let store = FlakyStore::new().await;
    let coordinator = Arc::new(TaskCoordinator::new(store.clone(), &Config::default()));
    let agent = Arc::new(ScriptedAgent::new());

    let task_id = coordinator.submit(TaskSubmission::new(json!({}))).await.unwrap();
    // The swarm's first write is the Claimed -> Running transition
    store.fail_next_put.store(true, Ordering::SeqCst);
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(1));
    swarm.start().await.unwrap();

    assert!(wait_for_status(&coordinator, task_id, TaskStatus::Completed).await);
    swarm.stop().await.unwrap();

    assert!(!store.fail_next_put.load(Ordering::SeqCst));
    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.retry_count, 0);
    assert!(task.attempts.is_empty());
    assert_eq!(agent.executions().await.len(), 1);
}

#[tokio::test]
async fn test_unpersisted_heartbeats_do_not_stop_agent() {
    let store = FlakyStore::new().await;
    store.fail_heartbeats.store(true, Ordering::SeqCst);
    let coordinator = Arc::new(TaskCoordinator::new(store.clone(), &Config::default()));
    let agent = Arc::new(
        ScriptedAgent::new()
            .with_heartbeat_every(Duration::from_millis(20))
            .with_default(Behavior::succeed(json!("done")).after(Duration::from_millis(200))),
    );

    let task_id = coordinator.submit(TaskSubmission::new(json!({}))).await.unwrap();
    let swarm = SwarmOrchestrator::new(Arc::clone(&coordinator), agent.clone(), swarm_config(1));
    swarm.start().await.unwrap();

    assert!(wait_for_status(&coordinator, task_id, TaskStatus::Completed).await);
    swarm.stop().await.unwrap();

    let task = coordinator.get(task_id).await.unwrap();
    assert_eq!(task.retry_count, 0);
    assert_eq!(task.result, Some(json!("done")));
    assert_eq!(agent.executions().await.len(), 1);
    assert_eq!(swarm.stats().await.agents_crashed, 0);
}
