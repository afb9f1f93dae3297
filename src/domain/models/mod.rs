pub mod agent_slot;
pub mod checkpoint;
pub mod config;
pub mod dead_letter;
pub mod event;
pub mod task;

pub use agent_slot::{slot_claimant, AgentSlot, SlotState};
pub use checkpoint::{Checkpoint, LoopSpec, LoopStatus};
pub use config::{
    Config, DatabaseConfig, LoggingConfig, LoopConfig, QueueConfig, RecoveryConfig, RetryConfig,
    SwarmConfig,
};
pub use dead_letter::DeadLetterEntry;
pub use event::{EngineEvent, EventKind};
pub use task::{AttemptRecord, FailureClass, Task, TaskStatus, TaskSubmission};
