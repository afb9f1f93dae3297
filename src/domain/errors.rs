//! Domain errors for the Brood task engine.

use thiserror::Error;
use uuid::Uuid;

use super::models::task::TaskStatus;

/// Domain-level errors that can occur in the engine.
///
/// The split matters to callers: `Validation` and `NotFound` are the caller's
/// problem, `Conflict` means "retry the operation", execution errors describe
/// what happened to a task, and `Storage` means the true state of a task is
/// unknown. A storage error is never recorded as a task failure.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Dead letter entry not found: {0}")]
    DeadLetterNotFound(Uuid),

    #[error("Invalid state transition for task {task_id} from {from} to {to}")]
    InvalidTransition {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Concurrency conflict: {entity} {id} was modified")]
    Conflict { entity: String, id: String },

    #[error("Transient execution error: {0}")]
    TransientExecution(String),

    #[error("Permanent execution error: {0}")]
    PermanentExecution(String),

    #[error("Dependency {dependency} of task {task_id} can no longer complete")]
    DependencyFailed { task_id: Uuid, dependency: Uuid },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Intake halted after {0} consecutive storage failures")]
    IntakeHalted(u32),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Build a conflict error for a task record.
    pub fn task_conflict(id: Uuid) -> Self {
        Self::Conflict {
            entity: "task".to_string(),
            id: id.to_string(),
        }
    }

    /// Whether the error came from the durability layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Whether the whole operation may be retried by the caller.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}
