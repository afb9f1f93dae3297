//! Agent execution capability.
//!
//! The orchestrator knows nothing about what an agent does. It hands a task
//! to an `AgentRunner`, listens for heartbeats and waits for an outcome.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::domain::models::{FailureClass, Task};

/// Final outcome of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentOutcome {
    Success(serde_json::Value),
    Failure { error: String, class: FailureClass },
}

impl AgentOutcome {
    pub fn success(result: serde_json::Value) -> Self {
        Self::Success(result)
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            class: FailureClass::Transient,
        }
    }

    pub fn permanent(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
            class: FailureClass::Permanent,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Liveness signal from a running agent to its slot.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    tx: mpsc::UnboundedSender<()>,
}

impl Heartbeat {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report that the agent is alive. Never blocks.
    pub fn beat(&self) {
        let _ = self.tx.send(());
    }
}

/// Cooperative stop request for a running agent.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Pends forever if the
    /// sender is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Handles passed to an agent for one execution.
#[derive(Debug, Clone)]
pub struct AgentContext {
    pub slot_id: u32,
    /// 1-based execution attempt
    pub attempt: u32,
    pub heartbeat: Heartbeat,
    pub cancel: CancelSignal,
}

impl AgentContext {
    /// Context whose heartbeats and cancellation are not observed.
    pub fn detached(slot_id: u32) -> Self {
        let (heartbeat, _rx) = Heartbeat::channel();
        let (_tx, cancel) = CancelSignal::channel();
        Self {
            slot_id,
            attempt: 1,
            heartbeat,
            cancel,
        }
    }
}

/// Executes tasks. Implementations must call `ctx.heartbeat.beat()` at
/// least once per configured heartbeat interval while working.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    async fn execute(&self, task: Task, ctx: AgentContext) -> AgentOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_signal_resolves_after_cancel() {
        let (tx, mut signal) = CancelSignal::channel();
        assert!(!signal.is_cancelled());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .expect("cancel should resolve");
        assert!(signal.is_cancelled());
    }

    #[test]
    fn test_cancel_signal_wakes_waiter() {
        use tokio_test::{assert_pending, assert_ready, task};

        let (tx, mut signal) = CancelSignal::channel();
        let mut cancelled = task::spawn(signal.cancelled());
        assert_pending!(cancelled.poll());

        tx.send(true).unwrap();
        assert!(cancelled.is_woken());
        assert_ready!(cancelled.poll());
    }

    #[tokio::test]
    async fn test_cancel_signal_pends_when_sender_dropped() {
        let (tx, mut signal) = CancelSignal::channel();
        drop(tx);
        let waited = tokio::time::timeout(Duration::from_millis(50), signal.cancelled()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_is_received() {
        let (heartbeat, mut rx) = Heartbeat::channel();
        heartbeat.beat();
        assert!(rx.recv().await.is_some());
    }
}
