//! Brood - durable task queue and agent swarm
//!
//! Brood persists prioritized tasks with dependencies in SQLite, hands them
//! to a bounded pool of agents, retries failures with exponential backoff and
//! moves exhausted tasks to a dead-letter queue. Iterative loops run on top
//! of the queue with checkpoint-based resume.
//!
//! # Architecture
//!
//! The crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Application Layer** (`application`): task coordinator, swarm orchestrator, loop executor
//! - **Service Layer** (`services`): backoff policy and event bus
//! - **Adapters** (`adapters`): SQLite queue store and agent runners
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use brood::adapters::sqlite::{initialize_database, SqliteQueueStore};
//! use brood::{Config, TaskCoordinator, TaskSubmission};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::default();
//!     let pool = initialize_database("sqlite:.brood/brood.db", None).await?;
//!     let coordinator = TaskCoordinator::new(Arc::new(SqliteQueueStore::new(pool)), &config);
//!
//!     let id = coordinator
//!         .submit(TaskSubmission::new(json!({"command": "make test"})).with_priority(5))
//!         .await?;
//!     println!("submitted {id}");
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::{
    ConvergenceStrategy, LoopExecutor, LoopOutcome, SwarmOrchestrator, SwarmStats, TaskCoordinator,
};
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    Checkpoint, Config, DeadLetterEntry, FailureClass, LoopSpec, LoopStatus, Task, TaskStatus,
    TaskSubmission,
};
pub use domain::ports::{AgentOutcome, AgentRunner, QueueStore, TaskFilter};
pub use infrastructure::config::{ConfigError, ConfigLoader};
