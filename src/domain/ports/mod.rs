//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines the interfaces that infrastructure adapters implement:
//! - QueueStore: durable task, checkpoint and dead-letter storage
//! - AgentRunner: opaque execution of a task by an agent
//! - Clock: injectable time source
//!
//! These traits let the coordinator and orchestrator stay independent of
//! SQLite, process spawning and wall-clock time.

pub mod agent_runner;
pub mod clock;
pub mod queue_store;

pub use agent_runner::{AgentContext, AgentOutcome, AgentRunner, CancelSignal, Heartbeat};
pub use clock::{Clock, ManualClock, SystemClock};
pub use queue_store::{QueueStore, TaskFilter};
