//! Loop checkpoint model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Status of an iterative loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    #[default]
    Iterating,
    Converged,
    MaxIterationsExceeded,
    Cancelled,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Iterating => "iterating",
            Self::Converged => "converged",
            Self::MaxIterationsExceeded => "max_iterations_exceeded",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "iterating" => Some(Self::Iterating),
            "converged" => Some(Self::Converged),
            "max_iterations_exceeded" => Some(Self::MaxIterationsExceeded),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, Self::Iterating)
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a loop iterates on. Persisted with every checkpoint so a resume
/// only needs the loop id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSpec {
    /// Input handed to every iteration task
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    pub max_iterations: u32,
}

impl LoopSpec {
    pub fn new(payload: serde_json::Value, max_iterations: u32) -> Self {
        Self {
            payload,
            priority: 0,
            max_iterations,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Durable snapshot of loop progress. One latest checkpoint per loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Owning loop
    pub loop_id: Uuid,
    /// Last fully completed iteration (1-based)
    pub iteration: u32,
    pub status: LoopStatus,
    /// Result of the last completed iteration
    pub progress: serde_json::Value,
    pub spec: LoopSpec,
    /// Task that ran `iteration`
    pub last_task_id: Option<Uuid>,
    pub saved_at: DateTime<Utc>,
}
