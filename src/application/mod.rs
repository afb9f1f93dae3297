//! Application layer: the task state machine, the agent swarm and
//! iterative loops built on top of them.

pub mod loop_executor;
pub mod swarm_orchestrator;
pub mod task_coordinator;

pub use loop_executor::{
    iteration_key, ConvergenceCheck, ConvergenceStrategy, IterationOutcome, LoopExecutor,
    LoopOutcome,
};
pub use swarm_orchestrator::{SwarmOrchestrator, SwarmState, SwarmStats, MAX_AGENTS};
pub use task_coordinator::{CoordinatorSettings, TaskCoordinator, DEPENDENCY_UNRESOLVED};
