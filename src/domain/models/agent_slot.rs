//! Agent slot domain model.
//!
//! A slot is one logical execution lane of the swarm. It runs at most one
//! task at a time and is recycled after every task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of an agent slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// Waiting for work
    #[default]
    Idle,
    /// Claimed a task, agent being started
    Spawning,
    /// Agent executing a task
    Busy,
    /// Scheduled for removal once the current task finishes
    Terminating,
    /// Agent stopped heartbeating; being recycled
    Crashed,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Spawning => "spawning",
            Self::Busy => "busy",
            Self::Terminating => "terminating",
            Self::Crashed => "crashed",
        }
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one agent slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSlot {
    pub slot_id: u32,
    pub state: SlotState,
    pub task_id: Option<Uuid>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Set when the pool is shrunk; the slot exits after its current task
    pub terminating: bool,
}

impl AgentSlot {
    pub fn new(slot_id: u32) -> Self {
        Self {
            slot_id,
            state: SlotState::Idle,
            task_id: None,
            last_heartbeat: None,
            terminating: false,
        }
    }

    /// Name used as the claimant in the store.
    pub fn claimant(&self) -> String {
        slot_claimant(self.slot_id)
    }

    pub fn assign(&mut self, task_id: Uuid, now: DateTime<Utc>) {
        self.state = SlotState::Spawning;
        self.task_id = Some(task_id);
        self.last_heartbeat = Some(now);
    }

    pub fn mark_busy(&mut self) {
        self.state = SlotState::Busy;
    }

    pub fn heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat = Some(now);
    }

    pub fn mark_crashed(&mut self) {
        self.state = SlotState::Crashed;
    }

    /// Return to idle (or terminating) after a task.
    pub fn recycle(&mut self) {
        self.task_id = None;
        self.state = if self.terminating {
            SlotState::Terminating
        } else {
            SlotState::Idle
        };
    }

    pub fn request_termination(&mut self) {
        self.terminating = true;
        if self.task_id.is_none() {
            self.state = SlotState::Terminating;
        }
    }

    pub fn is_busy(&self) -> bool {
        self.task_id.is_some()
    }
}

/// Claimant string written to `tasks.claimed_by` for a slot.
pub fn slot_claimant(slot_id: u32) -> String {
    format!("slot-{slot_id}")
}
