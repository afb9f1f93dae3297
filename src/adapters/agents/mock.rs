//! Scripted agent for tests and demos.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::models::{FailureClass, Task};
use crate::domain::ports::{AgentContext, AgentOutcome, AgentRunner};

/// What the agent does for one execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Succeed(Value),
    Fail { error: String, class: FailureClass },
    /// Stop heartbeating and never return
    Hang,
    /// Work (heartbeating) for the duration, then apply the inner behavior
    Delay(Duration, Box<Behavior>),
}

impl Behavior {
    pub fn succeed(result: Value) -> Self {
        Self::Succeed(result)
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self::Fail {
            error: error.into(),
            class: FailureClass::Transient,
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self::Fail {
            error: error.into(),
            class: FailureClass::Permanent,
        }
    }

    pub fn after(self, delay: Duration) -> Self {
        Self::Delay(delay, Box::new(self))
    }
}

/// One recorded execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub task_id: Uuid,
    pub slot_id: u32,
    pub attempt: u32,
}

type Responder = dyn Fn(&Task) -> Behavior + Send + Sync;

/// Agent whose behavior is scripted up front.
///
/// Behaviors are taken from the script in execution order; once it is
/// exhausted the responder (or the default) decides.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Behavior>>,
    responder: Option<Arc<Responder>>,
    /// Echo the payload when unset
    default: Option<Behavior>,
    heartbeat_every: Duration,
    executions: Mutex<Vec<Execution>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAgent {
    /// Agent that echoes each task's payload back as its result.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            responder: None,
            default: None,
            heartbeat_every: Duration::from_millis(50),
            executions: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    pub fn with_script(mut self, script: impl IntoIterator<Item = Behavior>) -> Self {
        self.script = Mutex::new(script.into_iter().collect());
        self
    }

    pub fn with_default(mut self, behavior: Behavior) -> Self {
        self.default = Some(behavior);
        self
    }

    /// Decide per task once the script is exhausted.
    pub fn with_responder(mut self, responder: impl Fn(&Task) -> Behavior + Send + Sync + 'static) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn with_heartbeat_every(mut self, every: Duration) -> Self {
        self.heartbeat_every = every;
        self
    }

    pub async fn executions(&self) -> Vec<Execution> {
        self.executions.lock().await.clone()
    }

    /// Most executions ever observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    async fn next_behavior(&self, task: &Task) -> Behavior {
        if let Some(behavior) = self.script.lock().await.pop_front() {
            return behavior;
        }
        match &self.responder {
            Some(responder) => responder(task),
            None => self
                .default
                .clone()
                .unwrap_or_else(|| Behavior::Succeed(task.payload.clone())),
        }
    }

    async fn perform(&self, behavior: Behavior, ctx: &mut AgentContext) -> AgentOutcome {
        let mut behavior = behavior;
        loop {
            match behavior {
                Behavior::Succeed(result) => return AgentOutcome::Success(result),
                Behavior::Fail { error, class } => return AgentOutcome::Failure { error, class },
                Behavior::Hang => return std::future::pending::<AgentOutcome>().await,
                Behavior::Delay(duration, inner) => {
                    let deadline = tokio::time::Instant::now() + duration;
                    let mut ticker = tokio::time::interval(self.heartbeat_every);
                    loop {
                        tokio::select! {
                            () = tokio::time::sleep_until(deadline) => break,
                            _ = ticker.tick() => ctx.heartbeat.beat(),
                            () = ctx.cancel.cancelled() => {
                                return AgentOutcome::transient("cancelled");
                            }
                        }
                    }
                    behavior = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn execute(&self, task: Task, mut ctx: AgentContext) -> AgentOutcome {
        self.executions.lock().await.push(Execution {
            task_id: task.id,
            slot_id: ctx.slot_id,
            attempt: ctx.attempt,
        });

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now_active, Ordering::SeqCst);
        // Aborted executions must still leave the active count
        let _active = ActiveGuard(&self.active);

        ctx.heartbeat.beat();
        let behavior = self.next_behavior(&task).await;
        self.perform(behavior, &mut ctx).await
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_then_default() {
        let agent = ScriptedAgent::new()
            .with_script([Behavior::transient("flaky"), Behavior::succeed(json!(1))]);
        let task = Task::new(json!({"echo": true}));

        let first = agent.execute(task.clone(), AgentContext::detached(0)).await;
        assert_eq!(first, AgentOutcome::transient("flaky"));
        let second = agent.execute(task.clone(), AgentContext::detached(0)).await;
        assert_eq!(second, AgentOutcome::Success(json!(1)));
        let third = agent.execute(task.clone(), AgentContext::detached(0)).await;
        assert_eq!(third, AgentOutcome::Success(json!({"echo": true})));

        assert_eq!(agent.executions().await.len(), 3);
    }

    #[tokio::test]
    async fn test_responder_decides_per_task() {
        let agent = ScriptedAgent::new().with_responder(|task| {
            if task.priority > 0 {
                Behavior::succeed(json!("urgent"))
            } else {
                Behavior::permanent("ignored")
            }
        });

        let urgent = agent.execute(Task::new(json!({})).with_priority(1), AgentContext::detached(0)).await;
        assert!(urgent.is_success());
        let ignored = agent.execute(Task::new(json!({})), AgentContext::detached(0)).await;
        assert!(!ignored.is_success());
    }

    #[tokio::test]
    async fn test_delay_heartbeats() {
        let agent = ScriptedAgent::new()
            .with_heartbeat_every(Duration::from_millis(10))
            .with_script([Behavior::succeed(json!(null)).after(Duration::from_millis(60))]);
        let (heartbeat, mut rx) = crate::domain::ports::Heartbeat::channel();
        let (_cancel_tx, cancel) = crate::domain::ports::CancelSignal::channel();
        let ctx = AgentContext { slot_id: 0, attempt: 1, heartbeat, cancel };

        let outcome = agent.execute(Task::new(json!({})), ctx).await;
        assert!(outcome.is_success());

        let mut beats = 0;
        while rx.try_recv().is_ok() {
            beats += 1;
        }
        assert!(beats >= 3, "expected several heartbeats, got {beats}");
    }
}
