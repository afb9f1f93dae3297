//! Swarm Orchestrator with per-slot background workers
//!
//! Runs a bounded pool of agent slots against the shared task queue. Each
//! slot is its own tokio task: it claims one task at a time through the
//! coordinator, drives the agent, watches its heartbeats and reports the
//! outcome. Slots never share a lock; the coordinator's atomic claim is the
//! only point where they meet.

use crate::application::task_coordinator::TaskCoordinator;
use crate::domain::errors::DomainError;
use crate::domain::models::{
    AgentSlot, EngineEvent, EventKind, FailureClass, SlotState, SwarmConfig, Task, TaskStatus,
};
use crate::domain::ports::{AgentContext, AgentOutcome, AgentRunner, CancelSignal, Heartbeat};
use anyhow::{bail, Context, Result};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, interval_at, sleep, sleep_until, Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Upper bound on concurrent agent slots
pub const MAX_AGENTS: usize = 100;

/// How long a cancelled agent gets to wind down before it is aborted
const CANCEL_GRACE: Duration = Duration::from_secs(5);

/// Swarm orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmState {
    /// Swarm is stopped
    Stopped,
    /// Swarm is recovering stale work and spawning slots
    Starting,
    /// Swarm is running and processing tasks
    Running,
    /// Swarm is waiting for in-flight tasks before stopping
    Stopping,
}

/// Statistics about the swarm
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwarmStats {
    pub state: SwarmState,
    /// Slot count the pool is converging to
    pub target_agents: usize,
    /// Slots currently alive, including those winding down
    pub slots: usize,
    pub idle_agents: usize,
    pub busy_agents: usize,
    pub terminating_agents: usize,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
    pub agents_crashed: u64,
}

#[derive(Debug, Default)]
struct SwarmCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    crashed: AtomicU64,
}

/// Registry entry for a live slot worker
struct SlotHandle {
    slot: Arc<RwLock<AgentSlot>>,
    retire: Arc<Notify>,
    handle: JoinHandle<()>,
}

/// State every slot worker shares with the orchestrator.
struct SwarmShared {
    coordinator: Arc<TaskCoordinator>,
    runner: Arc<dyn AgentRunner>,
    config: SwarmConfig,
    counters: SwarmCounters,
    slots: Mutex<BTreeMap<u32, SlotHandle>>,
    shutdown_tx: broadcast::Sender<()>,
}

/// How one agent execution ended, from the slot's point of view.
enum Finish {
    Outcome(AgentOutcome),
    Panicked(String),
    TimedOut,
    Cancelled,
    /// The task left Running without this slot, e.g. recovered elsewhere
    Lost,
}

/// Aborts the wrapped agent task when the slot stops waiting for it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Swarm orchestrator with concurrent task processing
///
/// Orchestrates agent slots using tokio primitives:
/// - one spawned task per slot, so concurrency is bounded by the slot count
/// - the coordinator's `Notify` to wake idle slots when work arrives
/// - an mpsc heartbeat channel and a watch cancel signal per execution
/// - a broadcast channel for shutdown
///
/// # Architecture
///
/// ```text
/// ┌─────────────────────────────────────────────┐
/// │         SwarmOrchestrator                   │
/// ├─────────────────────────────────────────────┤
/// │ - Slot registry (BTreeMap<u32, SlotHandle>) │
/// │ - Task Coordinator (claim / outcome)        │
/// │ - Recovery monitor (optional sweep)         │
/// └─────────────────────────────────────────────┘
///          │                    │
///          ▼                    ▼
///    Slot workers x N     Recovery monitor
///   (claim → run → report)  (stale sweep)
///          │
///          ▼
///     AgentRunner tasks
/// ```
///
/// # Examples
///
/// ```no_run
/// use brood::application::{SwarmOrchestrator, TaskCoordinator};
/// use brood::adapters::agents::ScriptedAgent;
/// use brood::domain::models::SwarmConfig;
/// use std::sync::Arc;
///
/// # async fn example(coordinator: Arc<TaskCoordinator>) -> anyhow::Result<()> {
/// let orchestrator = SwarmOrchestrator::new(
///     coordinator,
///     Arc::new(ScriptedAgent::new()),
///     SwarmConfig::default(),
/// );
///
/// orchestrator.start().await?;
/// orchestrator.resize(8).await?;
///
/// let stats = orchestrator.stats().await;
/// println!("Busy agents: {}", stats.busy_agents);
///
/// orchestrator.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct SwarmOrchestrator {
    state: Arc<RwLock<SwarmState>>,
    target_agents: AtomicUsize,
    next_slot_id: AtomicU32,
    shared: Arc<SwarmShared>,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SwarmOrchestrator {
    /// Create a stopped orchestrator sized from `config.max_agents`.
    pub fn new(
        coordinator: Arc<TaskCoordinator>,
        runner: Arc<dyn AgentRunner>,
        config: SwarmConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let target = config.max_agents.clamp(1, MAX_AGENTS);

        Self {
            state: Arc::new(RwLock::new(SwarmState::Stopped)),
            target_agents: AtomicUsize::new(target),
            next_slot_id: AtomicU32::new(0),
            shared: Arc::new(SwarmShared {
                coordinator,
                runner,
                config,
                counters: SwarmCounters::default(),
                slots: Mutex::new(BTreeMap::new()),
                shutdown_tx,
            }),
            monitor_handle: Mutex::new(None),
        }
    }

    /// Start the swarm
    ///
    /// 1. Reset stale claimed/running tasks left by a previous process
    /// 2. Spawn the configured number of slots
    /// 3. Start the periodic recovery monitor when enabled
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != SwarmState::Stopped {
                return Ok(());
            }
            *state = SwarmState::Starting;
        }

        let target = self.target_agents.load(Ordering::SeqCst);
        info!(
            max_agents = target,
            runner = self.shared.runner.name(),
            "Starting swarm orchestrator"
        );

        match self.shared.coordinator.recover_stale().await {
            Ok(recovered) if !recovered.is_empty() => {
                info!(count = recovered.len(), "Recovered stale tasks before start");
            }
            Ok(_) => {}
            Err(e) => {
                *self.state.write().await = SwarmState::Stopped;
                return Err(e).context("Crash recovery sweep failed");
            }
        }

        {
            let mut slots = self.shared.slots.lock().await;
            for _ in 0..target {
                self.spawn_slot(&mut slots);
            }
        }

        let sweep_secs = self.shared.config.recovery_sweep_interval_secs;
        if sweep_secs > 0 {
            let handle = self.spawn_recovery_monitor(Duration::from_secs(sweep_secs));
            *self.monitor_handle.lock().await = Some(handle);
        }

        *self.state.write().await = SwarmState::Running;
        info!("Swarm orchestrator started successfully");
        Ok(())
    }

    /// Stop the swarm
    ///
    /// Idle slots exit immediately. Busy slots finish their current task
    /// unless the shutdown timeout expires first, in which case they are
    /// aborted and their tasks are left for the recovery sweep.
    pub async fn stop(&self) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if matches!(*state, SwarmState::Stopped | SwarmState::Stopping) {
                return Ok(());
            }
            *state = SwarmState::Stopping;
        }

        info!("Stopping swarm orchestrator");
        let _ = self.shared.shutdown_tx.send(());

        if let Some(handle) = self.monitor_handle.lock().await.take() {
            handle.abort();
        }

        let drained: Vec<SlotHandle> = {
            let mut slots = self.shared.slots.lock().await;
            std::mem::take(&mut *slots).into_values().collect()
        };
        for entry in &drained {
            entry.retire.notify_one();
        }

        let busy = {
            let mut busy = 0;
            for entry in &drained {
                if entry.slot.read().await.is_busy() {
                    busy += 1;
                }
            }
            busy
        };
        if busy > 0 {
            info!(busy_agents = busy, "Waiting for in-flight tasks to finish");
        }

        let aborts: Vec<_> = drained.iter().map(|e| e.handle.abort_handle()).collect();
        let joins = join_all(drained.into_iter().map(|e| e.handle));

        match tokio::time::timeout(self.shared.config.shutdown_timeout(), joins).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        warn!(error = ?e, "Slot worker ended abnormally");
                    }
                }
                info!("All slots stopped");
            }
            Err(_) => {
                warn!(
                    remaining = aborts.iter().filter(|a| !a.is_finished()).count(),
                    "Shutdown timeout reached, aborting in-flight slots"
                );
                for abort in aborts {
                    abort.abort();
                }
            }
        }

        *self.state.write().await = SwarmState::Stopped;
        info!("Swarm orchestrator stopped");
        Ok(())
    }

    /// Change the number of slots.
    ///
    /// Growing spawns slots immediately. Shrinking marks the highest-numbered
    /// slots as terminating; each exits once its current task is done.
    pub async fn resize(&self, target: usize) -> Result<()> {
        if !(1..=MAX_AGENTS).contains(&target) {
            bail!("Agent count must be between 1 and {MAX_AGENTS}, got {target}");
        }

        let previous = self.target_agents.swap(target, Ordering::SeqCst);
        if *self.state.read().await != SwarmState::Running {
            info!(new_max_agents = target, "Max agents updated (applies on start)");
            return Ok(());
        }

        let mut slots = self.shared.slots.lock().await;
        let mut active = Vec::with_capacity(slots.len());
        for (slot_id, entry) in slots.iter() {
            if !entry.slot.read().await.terminating {
                active.push(*slot_id);
            }
        }

        if active.len() < target {
            for _ in active.len()..target {
                self.spawn_slot(&mut slots);
            }
        } else {
            for slot_id in active.iter().rev().take(active.len() - target) {
                if let Some(entry) = slots.get(slot_id) {
                    entry.slot.write().await.request_termination();
                    entry.retire.notify_one();
                }
            }
        }

        info!(from = previous, to = target, "Swarm resized");
        Ok(())
    }

    /// Get current swarm statistics
    pub async fn stats(&self) -> SwarmStats {
        let slots = self.slots().await;
        let counters = &self.shared.counters;

        SwarmStats {
            state: self.state().await,
            target_agents: self.target_agents.load(Ordering::SeqCst),
            slots: slots.len(),
            idle_agents: slots.iter().filter(|s| s.state == SlotState::Idle).count(),
            busy_agents: slots.iter().filter(|s| s.is_busy()).count(),
            // Includes busy slots draining their last task
            terminating_agents: slots.iter().filter(|s| s.terminating).count(),
            tasks_processed: counters.processed.load(Ordering::SeqCst),
            tasks_failed: counters.failed.load(Ordering::SeqCst),
            agents_crashed: counters.crashed.load(Ordering::SeqCst),
        }
    }

    /// Snapshot of every live slot, ordered by slot id.
    pub async fn slots(&self) -> Vec<AgentSlot> {
        let slots = self.shared.slots.lock().await;
        let mut snapshot = Vec::with_capacity(slots.len());
        for entry in slots.values() {
            snapshot.push(entry.slot.read().await.clone());
        }
        snapshot
    }

    /// Get current swarm state
    pub async fn state(&self) -> SwarmState {
        *self.state.read().await
    }

    pub fn coordinator(&self) -> &Arc<TaskCoordinator> {
        &self.shared.coordinator
    }

    /// Wait until no task is pending, claimed or running and every slot is
    /// idle. Callers bound this with their own timeout.
    pub async fn wait_until_idle(&self, poll_interval: Duration) -> Result<()> {
        loop {
            let counts = self
                .shared
                .coordinator
                .count_by_status()
                .await
                .context("Failed to count tasks")?;
            let outstanding: u64 = [TaskStatus::Pending, TaskStatus::Claimed, TaskStatus::Running]
                .iter()
                .filter_map(|status| counts.get(status))
                .sum();
            let busy = self.slots().await.iter().any(AgentSlot::is_busy);

            if outstanding == 0 && !busy {
                return Ok(());
            }
            debug!(outstanding, busy, "Waiting for swarm to go idle");
            sleep(poll_interval).await;
        }
    }

    /// Task currently held by each busy slot.
    pub async fn assignments(&self) -> HashMap<u32, Uuid> {
        self.slots()
            .await
            .into_iter()
            .filter_map(|slot| slot.task_id.map(|task_id| (slot.slot_id, task_id)))
            .collect()
    }

    // ========================
    // Background Tasks
    // ========================

    fn spawn_slot(&self, slots: &mut BTreeMap<u32, SlotHandle>) {
        let slot_id = self.next_slot_id.fetch_add(1, Ordering::SeqCst);
        let slot = Arc::new(RwLock::new(AgentSlot::new(slot_id)));
        let retire = Arc::new(Notify::new());
        let shutdown_rx = self.shared.shutdown_tx.subscribe();

        let handle = tokio::spawn(run_slot(
            Arc::clone(&self.shared),
            Arc::clone(&slot),
            Arc::clone(&retire),
            shutdown_rx,
        ));
        slots.insert(slot_id, SlotHandle { slot, retire, handle });
        debug!(slot_id, "Spawned agent slot");
    }

    fn spawn_recovery_monitor(&self, every: Duration) -> JoinHandle<()> {
        let coordinator = Arc::clone(&self.shared.coordinator);
        let mut shutdown_rx = self.shared.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = interval(every);
            // First tick is immediate and start() has just swept
            ticker.tick().await;
            info!(interval_secs = every.as_secs(), "Recovery monitor started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = coordinator.recover_stale().await {
                            error!(error = %e, "Periodic recovery sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("Recovery monitor stopped");
        })
    }
}

/// Main loop of one slot: claim, run, report, repeat.
async fn run_slot(
    shared: Arc<SwarmShared>,
    slot: Arc<RwLock<AgentSlot>>,
    retire: Arc<Notify>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let slot_id = slot.read().await.slot_id;
    let work = shared.coordinator.work_notifier();
    debug!(slot_id, "Slot worker started");

    loop {
        if slot.read().await.terminating {
            break;
        }
        if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
            break;
        }

        // Register for wake-ups before claiming so a submit racing with an
        // empty claim is not missed
        let notified = work.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        match shared.coordinator.claim(slot_id, 1).await {
            Ok(mut tasks) if !tasks.is_empty() => {
                let task = tasks.swap_remove(0);
                shared.run_task(&slot, task).await;
                continue;
            }
            Ok(_) => {}
            Err(e) => warn!(slot_id, error = %e, "Failed to claim task"),
        }

        tokio::select! {
            () = &mut notified => {}
            () = sleep(shared.config.poll_interval()) => {}
            () = retire.notified() => {}
            _ = shutdown_rx.recv() => break,
        }
    }

    slot.write().await.state = SlotState::Terminating;
    shared.slots.lock().await.remove(&slot_id);
    debug!(slot_id, "Slot worker exited");
}

impl SwarmShared {
    /// Run one claimed task to an outcome and recycle the slot.
    async fn run_task(&self, slot: &RwLock<AgentSlot>, task: Task) {
        let task_id = task.id;
        let slot_id = {
            let mut slot = slot.write().await;
            slot.assign(task_id, self.coordinator.clock().now());
            slot.slot_id
        };

        let task = match self.coordinator.start(task_id).await {
            Ok(task) => task,
            Err(DomainError::InvalidTransition { from, .. }) => {
                // Typically cancelled between claim and start
                info!(slot_id, %task_id, status = %from, "Claimed task can no longer start");
                slot.write().await.recycle();
                return;
            }
            Err(e) => {
                warn!(slot_id, %task_id, error = %e, "Failed to start claimed task, releasing claim");
                if let Err(e) = self.coordinator.release(task_id).await {
                    error!(slot_id, %task_id, error = %e, "Failed to release claim, leaving it to the stale sweep");
                }
                slot.write().await.recycle();
                return;
            }
        };
        slot.write().await.mark_busy();
        info!(slot_id, %task_id, attempt = task.retry_count + 1, "Agent started task");

        let finish = self.supervise(slot, slot_id, task).await;
        self.report(slot, slot_id, task_id, finish).await;
        slot.write().await.recycle();
    }

    /// Drive the agent until it returns, goes silent or the task is cancelled.
    async fn supervise(&self, slot: &RwLock<AgentSlot>, slot_id: u32, task: Task) -> Finish {
        let task_id = task.id;
        let (heartbeat, mut beats) = Heartbeat::channel();
        let (cancel_tx, cancel) = CancelSignal::channel();
        let ctx = AgentContext {
            slot_id,
            attempt: task.retry_count + 1,
            heartbeat,
            cancel,
        };

        let mut events = self.coordinator.events().subscribe();
        let runner = Arc::clone(&self.runner);
        let mut agent = AbortOnDrop(tokio::spawn(async move { runner.execute(task, ctx).await }));

        let timeout = self.config.heartbeat_timeout();
        let mut deadline = Instant::now() + timeout;
        let mut beats_open = true;
        let mut events_open = true;
        // Cancels from other processes never reach the local event bus
        let check_every = self.config.poll_interval();
        let mut status_check = interval_at(Instant::now() + check_every, check_every);
        let mut beat_since_check = false;

        let finish = loop {
            tokio::select! {
                joined = &mut agent.0 => {
                    break match joined {
                        Ok(outcome) => Finish::Outcome(outcome),
                        Err(e) => Finish::Panicked(e.to_string()),
                    };
                }
                beat = beats.recv(), if beats_open => match beat {
                    Some(()) => {
                        deadline = Instant::now() + timeout;
                        beat_since_check = true;
                        slot.write().await.heartbeat(self.coordinator.clock().now());
                        match self.coordinator.heartbeat(task_id).await {
                            Ok(true) => {}
                            Ok(false) => break self.claim_lost(task_id).await,
                            Err(e) => warn!(slot_id, %task_id, error = %e, "Failed to persist heartbeat"),
                        }
                    }
                    None => beats_open = false,
                },
                () = sleep_until(deadline) => break Finish::TimedOut,
                _ = status_check.tick() => {
                    if !std::mem::take(&mut beat_since_check) {
                        if let Some(finish) = self.released_elsewhere(task_id).await {
                            break finish;
                        }
                    }
                }
                received = events.recv(), if events_open => match received {
                    Ok(event) if event.kind == EventKind::Cancelled && event.task_id == Some(task_id) => {
                        break Finish::Cancelled;
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {
                        if self.is_cancelled(task_id).await {
                            break Finish::Cancelled;
                        }
                    }
                    Err(RecvError::Closed) => events_open = false,
                },
            }
        };

        if matches!(finish, Finish::Cancelled | Finish::Lost) {
            let _ = cancel_tx.send(true);
            if tokio::time::timeout(CANCEL_GRACE, &mut agent.0).await.is_err() {
                warn!(slot_id, %task_id, "Agent ignored cancellation, aborting");
            }
        }
        drop(agent);
        finish
    }

    async fn report(&self, slot: &RwLock<AgentSlot>, slot_id: u32, task_id: Uuid, finish: Finish) {
        let counters = &self.counters;
        match finish {
            Finish::Outcome(AgentOutcome::Success(result)) => {
                match self.coordinator.complete(task_id, result).await {
                    Ok(task) if task.status == TaskStatus::Completed => {
                        counters.processed.fetch_add(1, Ordering::SeqCst);
                        info!(slot_id, %task_id, "Agent completed task");
                    }
                    Ok(task) => {
                        debug!(slot_id, %task_id, status = %task.status, "Late result discarded");
                    }
                    Err(e) => error!(slot_id, %task_id, error = %e, "Failed to record completion"),
                }
            }
            Finish::Outcome(AgentOutcome::Failure { error, class }) => {
                warn!(slot_id, %task_id, %class, %error, "Agent failed task");
                self.record_failure(slot_id, task_id, &error, class).await;
            }
            Finish::Panicked(reason) => {
                let message = format!("agent panicked: {reason}");
                self.crash(slot, slot_id, task_id, &message).await;
                self.record_failure(slot_id, task_id, &message, FailureClass::Transient)
                    .await;
            }
            Finish::TimedOut => {
                let message = format!(
                    "no heartbeat for {}ms",
                    self.config.heartbeat_timeout().as_millis()
                );
                self.crash(slot, slot_id, task_id, &message).await;
                self.record_failure(slot_id, task_id, &message, FailureClass::Timeout)
                    .await;
            }
            Finish::Cancelled => info!(slot_id, %task_id, "Task cancelled while running"),
            Finish::Lost => warn!(slot_id, %task_id, "Task no longer held by this slot, outcome dropped"),
        }
    }

    async fn record_failure(&self, slot_id: u32, task_id: Uuid, error: &str, class: FailureClass) {
        match self.coordinator.fail(task_id, error, class).await {
            Ok(task) if task.status == TaskStatus::Cancelled => {
                debug!(slot_id, %task_id, "Failure of cancelled task discarded");
            }
            Ok(_) => {
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
            }
            Err(e) => error!(slot_id, %task_id, error = %e, "Failed to record task failure"),
        }
    }

    async fn crash(&self, slot: &RwLock<AgentSlot>, slot_id: u32, task_id: Uuid, reason: &str) {
        slot.write().await.mark_crashed();
        self.counters.crashed.fetch_add(1, Ordering::SeqCst);
        self.coordinator.events().publish(
            EngineEvent::new(EventKind::AgentCrashed, self.coordinator.clock().now())
                .for_task(task_id)
                .on_slot(slot_id)
                .with_detail(reason),
        );
    }

    /// Why a heartbeat found the task no longer claimed or running.
    async fn claim_lost(&self, task_id: Uuid) -> Finish {
        if self.is_cancelled(task_id).await {
            Finish::Cancelled
        } else {
            Finish::Lost
        }
    }

    /// Re-read a running task and report if it has moved on without us.
    async fn released_elsewhere(&self, task_id: Uuid) -> Option<Finish> {
        match self.coordinator.get(task_id).await {
            Ok(task) => match task.status {
                TaskStatus::Running => None,
                TaskStatus::Cancelled => Some(Finish::Cancelled),
                _ => Some(Finish::Lost),
            },
            Err(e) => {
                warn!(%task_id, error = %e, "Failed to re-check running task");
                None
            }
        }
    }

    async fn is_cancelled(&self, task_id: Uuid) -> bool {
        self.coordinator
            .get(task_id)
            .await
            .is_ok_and(|task| task.status == TaskStatus::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::ScriptedAgent;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteQueueStore};
    use crate::domain::models::Config;

    async fn orchestrator(max_agents: usize) -> SwarmOrchestrator {
        let pool = create_migrated_test_pool().await.unwrap();
        let store = Arc::new(SqliteQueueStore::new(pool));
        let coordinator = Arc::new(TaskCoordinator::new(store, &Config::default()));
        let config = SwarmConfig {
            max_agents,
            poll_interval_ms: 20,
            ..SwarmConfig::default()
        };
        SwarmOrchestrator::new(coordinator, Arc::new(ScriptedAgent::new()), config)
    }

    #[tokio::test]
    async fn test_new_orchestrator_is_stopped() {
        let orchestrator = orchestrator(3).await;
        let stats = orchestrator.stats().await;
        assert_eq!(stats.state, SwarmState::Stopped);
        assert_eq!(stats.target_agents, 3);
        assert_eq!(stats.slots, 0);
    }

    #[tokio::test]
    async fn test_start_spawns_slots_and_stop_drains_them() {
        let orchestrator = orchestrator(3).await;
        orchestrator.start().await.unwrap();
        assert_eq!(orchestrator.state().await, SwarmState::Running);
        assert_eq!(orchestrator.slots().await.len(), 3);

        orchestrator.stop().await.unwrap();
        assert_eq!(orchestrator.state().await, SwarmState::Stopped);
        assert!(orchestrator.slots().await.is_empty());
    }

    #[tokio::test]
    async fn test_resize_rejects_out_of_range() {
        let orchestrator = orchestrator(2).await;
        assert!(orchestrator.resize(0).await.is_err());
        assert!(orchestrator.resize(MAX_AGENTS + 1).await.is_err());

        orchestrator.resize(5).await.unwrap();
        assert_eq!(orchestrator.stats().await.target_agents, 5);
    }

    #[tokio::test]
    async fn test_abort_on_drop_aborts_task() {
        let handle = tokio::spawn(std::future::pending::<()>());
        let abort = handle.abort_handle();
        drop(AbortOnDrop(handle));
        tokio::time::timeout(Duration::from_secs(1), async {
            while !abort.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("agent task should be aborted");
    }
}
