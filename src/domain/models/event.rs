//! Engine events emitted on every task state transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Submitted,
    Claimed,
    Started,
    Completed,
    Failed,
    DeadLettered,
    Cancelled,
    /// Re-enqueued from the dead letter queue
    Retried,
    /// Reset to pending by the crash recovery sweep
    Recovered,
    AgentCrashed,
    CheckpointSaved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Claimed => "claimed",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::DeadLettered => "dead_lettered",
            Self::Cancelled => "cancelled",
            Self::Retried => "retried",
            Self::Recovered => "recovered",
            Self::AgentCrashed => "agent_crashed",
            Self::CheckpointSaved => "checkpoint_saved",
        }
    }

    /// Whether the event moves a task into a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::DeadLettered | Self::Cancelled)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured engine event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Monotonic per-process sequence number
    pub sequence: u64,
    pub kind: EventKind,
    pub task_id: Option<Uuid>,
    pub slot_id: Option<u32>,
    pub timestamp: DateTime<Utc>,
    /// Queue wait for `claimed`, execution time for terminal events
    pub duration_ms: Option<i64>,
    /// Error message, classification or other free-form detail
    pub detail: Option<String>,
}

impl EngineEvent {
    pub fn new(kind: EventKind, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence: 0,
            kind,
            task_id: None,
            slot_id: None,
            timestamp,
            duration_ms: None,
            detail: None,
        }
    }

    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn on_slot(mut self, slot_id: u32) -> Self {
        self.slot_id = Some(slot_id);
        self
    }

    pub fn with_duration(mut self, duration: chrono::Duration) -> Self {
        self.duration_ms = Some(duration.num_milliseconds());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
