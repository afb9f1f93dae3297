//! LoopExecutor - Iterative task loops with convergence detection
//!
//! Each iteration is an ordinary queued task, so iterations are scheduled,
//! retried and recovered like any other work. After every completed
//! iteration the loop writes a checkpoint through the coordinator; resuming
//! a loop is a pure function of its id and that checkpoint.
//!
//! Iteration tasks carry the dedup key `loop:<id>:<n>`. A loop resumed after
//! a crash therefore re-attaches to an iteration task that was submitted
//! before the crash instead of running it a second time.

use crate::application::task_coordinator::TaskCoordinator;
use crate::domain::models::{Checkpoint, LoopConfig, LoopSpec, LoopStatus, TaskStatus, TaskSubmission};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// What a convergence check sees after an iteration completes
#[derive(Debug, Clone, Copy)]
pub struct IterationOutcome<'a> {
    /// 1-based iteration that just completed
    pub iteration: u32,
    pub result: &'a Value,
    /// Result of the iteration before, if any
    pub previous: Option<&'a Value>,
}

/// Decides whether a loop is done.
pub trait ConvergenceCheck: Send + Sync {
    fn is_converged(&self, outcome: &IterationOutcome<'_>) -> bool;
}

impl<F> ConvergenceCheck for F
where
    F: Fn(&IterationOutcome<'_>) -> bool + Send + Sync,
{
    fn is_converged(&self, outcome: &IterationOutcome<'_>) -> bool {
        self(outcome)
    }
}

/// Built-in convergence strategies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ConvergenceStrategy {
    /// Fixed number of iterations
    Fixed { iterations: u32 },

    /// Converges when a numeric result field reaches the target.
    /// `field` is a top-level key or a JSON pointer such as `/metrics/score`.
    Threshold { field: String, target: f64 },

    /// Converges when the relative change between consecutive results
    /// drops below `min_change_rate`
    Adaptive { min_change_rate: f64 },
}

impl ConvergenceCheck for ConvergenceStrategy {
    fn is_converged(&self, outcome: &IterationOutcome<'_>) -> bool {
        match self {
            Self::Fixed { iterations } => outcome.iteration >= *iterations,
            Self::Threshold { field, target } => {
                lookup(outcome.result, field)
                    .and_then(Value::as_f64)
                    .is_some_and(|value| value >= *target)
            }
            Self::Adaptive { min_change_rate } => outcome
                .previous
                .is_some_and(|previous| change_rate(previous, outcome.result) < *min_change_rate),
        }
    }
}

fn lookup<'a>(value: &'a Value, field: &str) -> Option<&'a Value> {
    if field.starts_with('/') {
        value.pointer(field)
    } else {
        value.get(field)
    }
}

/// Change between two results, 0.0 (identical) to 1.0 (unrelated).
///
/// Numbers compare by relative difference; anything else by the shared
/// prefix of the serialized JSON.
#[allow(clippy::cast_precision_loss)]
fn change_rate(previous: &Value, current: &Value) -> f64 {
    if previous == current {
        return 0.0;
    }
    if let (Some(a), Some(b)) = (previous.as_f64(), current.as_f64()) {
        let scale = a.abs().max(b.abs());
        return if scale == 0.0 { 0.0 } else { ((a - b).abs() / scale).min(1.0) };
    }

    let previous = previous.to_string();
    let current = current.to_string();
    let max_len = previous.chars().count().max(current.chars().count());
    let common_prefix = previous
        .chars()
        .zip(current.chars())
        .take_while(|(a, b)| a == b)
        .count();

    1.0 - (common_prefix as f64 / max_len as f64)
}

/// Final report of a loop run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub loop_id: Uuid,
    pub status: LoopStatus,
    /// Iterations completed
    pub iterations: u32,
    /// Result of the last completed iteration
    pub result: Option<Value>,
    pub last_task_id: Option<Uuid>,
}

impl LoopOutcome {
    fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        Self {
            loop_id: checkpoint.loop_id,
            status: checkpoint.status,
            iterations: checkpoint.iteration,
            result: (checkpoint.iteration > 0).then(|| checkpoint.progress.clone()),
            last_task_id: checkpoint.last_task_id,
        }
    }
}

/// Where a run picks up.
struct Position {
    next_iteration: u32,
    previous: Option<Value>,
    previous_task: Option<Uuid>,
}

/// LoopExecutor - runs iterative loops on top of the task queue
///
/// # Examples
///
/// ```no_run
/// use brood::application::{ConvergenceStrategy, LoopExecutor, TaskCoordinator};
/// use brood::domain::models::{LoopConfig, LoopSpec};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// # async fn example(coordinator: Arc<TaskCoordinator>) -> anyhow::Result<()> {
/// let executor = LoopExecutor::new(coordinator, LoopConfig::default());
/// let check = ConvergenceStrategy::Threshold { field: "score".into(), target: 0.9 };
///
/// let outcome = executor
///     .start_loop(LoopSpec::new(json!({"document": "draft.md"}), 5), &check)
///     .await?;
/// println!("{} after {} iterations", outcome.status, outcome.iterations);
/// # Ok(())
/// # }
/// ```
pub struct LoopExecutor {
    coordinator: Arc<TaskCoordinator>,
    config: LoopConfig,
    /// Iteration task currently awaited, per running loop
    active: RwLock<HashMap<Uuid, Uuid>>,
    cancel_requested: RwLock<HashSet<Uuid>>,
}

impl LoopExecutor {
    pub fn new(coordinator: Arc<TaskCoordinator>, config: LoopConfig) -> Self {
        Self {
            coordinator,
            config,
            active: RwLock::new(HashMap::new()),
            cancel_requested: RwLock::new(HashSet::new()),
        }
    }

    /// Start a new loop under a fresh id.
    pub async fn start_loop(&self, spec: LoopSpec, check: &dyn ConvergenceCheck) -> Result<LoopOutcome> {
        let loop_id = Uuid::new_v4();
        info!(%loop_id, max_iterations = spec.max_iterations, "Starting loop");
        self.run(loop_id, spec, check, Position::fresh()).await
    }

    /// Continue a loop from its latest checkpoint.
    ///
    /// Without a checkpoint this is a fresh start under `loop_id`. With one,
    /// the persisted spec wins over `spec` and iteration
    /// `checkpoint.iteration + 1` runs next. A finished loop returns its
    /// recorded outcome without submitting anything.
    pub async fn resume_loop(
        &self,
        loop_id: Uuid,
        spec: LoopSpec,
        check: &dyn ConvergenceCheck,
    ) -> Result<LoopOutcome> {
        let checkpoint = self
            .coordinator
            .latest_checkpoint(loop_id)
            .await
            .context("Failed to load loop checkpoint")?;

        match checkpoint {
            None => {
                info!(%loop_id, "No checkpoint found, starting loop from the beginning");
                self.run(loop_id, spec, check, Position::fresh()).await
            }
            Some(checkpoint) if checkpoint.status.is_finished() => {
                info!(%loop_id, status = %checkpoint.status, "Loop already finished");
                Ok(LoopOutcome::from_checkpoint(&checkpoint))
            }
            Some(checkpoint) => {
                info!(%loop_id, iteration = checkpoint.iteration, "Resuming loop from checkpoint");
                let position = Position {
                    next_iteration: checkpoint.iteration + 1,
                    previous: Some(checkpoint.progress),
                    previous_task: checkpoint.last_task_id,
                };
                self.run(loop_id, checkpoint.spec, check, position).await
            }
        }
    }

    /// Stop a loop. A loop running in this executor has its in-flight
    /// iteration task cancelled and ends `Cancelled`; a loop that is not
    /// running is marked cancelled in its checkpoint.
    pub async fn cancel_loop(&self, loop_id: Uuid) -> Result<()> {
        let in_flight = self.active.read().await.get(&loop_id).copied();
        if let Some(task_id) = in_flight {
            self.cancel_requested.write().await.insert(loop_id);
            self.coordinator
                .cancel(task_id)
                .await
                .context("Failed to cancel iteration task")?;
            info!(%loop_id, %task_id, "Loop cancellation requested");
            return Ok(());
        }

        let Some(mut checkpoint) = self
            .coordinator
            .latest_checkpoint(loop_id)
            .await
            .context("Failed to load loop checkpoint")?
        else {
            bail!("Loop {loop_id} has no checkpoint");
        };
        if checkpoint.status.is_finished() {
            debug!(%loop_id, status = %checkpoint.status, "Cancel of finished loop ignored");
            return Ok(());
        }

        checkpoint.status = LoopStatus::Cancelled;
        checkpoint.saved_at = self.coordinator.clock().now();
        self.coordinator
            .save_checkpoint(&checkpoint)
            .await
            .context("Failed to save loop checkpoint")?;
        info!(%loop_id, "Loop cancelled");
        Ok(())
    }

    async fn run(
        &self,
        loop_id: Uuid,
        spec: LoopSpec,
        check: &dyn ConvergenceCheck,
        position: Position,
    ) -> Result<LoopOutcome> {
        let result = self.iterate(loop_id, &spec, check, position).await;
        self.active.write().await.remove(&loop_id);
        self.cancel_requested.write().await.remove(&loop_id);
        result
    }

    async fn iterate(
        &self,
        loop_id: Uuid,
        spec: &LoopSpec,
        check: &dyn ConvergenceCheck,
        position: Position,
    ) -> Result<LoopOutcome> {
        let Position {
            next_iteration,
            mut previous,
            mut previous_task,
        } = position;
        let poll = Duration::from_millis(self.config.poll_interval_ms);
        let max_iterations = match spec.max_iterations {
            0 => self.config.max_iterations.max(1),
            n => n,
        };

        if next_iteration > max_iterations {
            // Crashed between the last iteration and its terminal checkpoint
            return self
                .finish(loop_id, spec, LoopStatus::MaxIterationsExceeded, next_iteration - 1, previous, previous_task)
                .await;
        }

        for iteration in next_iteration..=max_iterations {
            if self.cancel_requested.read().await.contains(&loop_id) {
                return self
                    .finish(loop_id, spec, LoopStatus::Cancelled, iteration - 1, previous, previous_task)
                    .await;
            }

            let task_id = self
                .submit_iteration(loop_id, spec, iteration, previous.as_ref(), previous_task)
                .await?;
            self.active.write().await.insert(loop_id, task_id);
            debug!(%loop_id, iteration, %task_id, "Waiting for iteration task");

            let task = self
                .coordinator
                .wait_for_terminal(task_id, poll)
                .await
                .with_context(|| format!("Failed waiting for iteration {iteration} of loop {loop_id}"))?;

            match task.status {
                TaskStatus::Completed => {}
                TaskStatus::Cancelled => {
                    info!(%loop_id, iteration, "Iteration task cancelled, ending loop");
                    return self
                        .finish(loop_id, spec, LoopStatus::Cancelled, iteration - 1, previous, previous_task)
                        .await;
                }
                status => {
                    warn!(%loop_id, iteration, %task_id, %status, "Iteration task did not complete");
                    bail!(
                        "Iteration {iteration} of loop {loop_id} ended {status}: {}",
                        task.last_error.as_deref().unwrap_or("no error recorded")
                    );
                }
            }

            let result = task.result.unwrap_or(Value::Null);
            let converged = check.is_converged(&IterationOutcome {
                iteration,
                result: &result,
                previous: previous.as_ref(),
            });

            let status = if converged {
                LoopStatus::Converged
            } else if iteration >= max_iterations {
                LoopStatus::MaxIterationsExceeded
            } else {
                LoopStatus::Iterating
            };

            self.save(loop_id, spec, status, iteration, result.clone(), Some(task_id))
                .await?;
            debug!(%loop_id, iteration, %status, "Iteration checkpointed");

            previous = Some(result);
            previous_task = Some(task_id);

            if status.is_finished() {
                info!(%loop_id, iterations = iteration, %status, "Loop finished");
                return Ok(LoopOutcome {
                    loop_id,
                    status,
                    iterations: iteration,
                    result: previous,
                    last_task_id: previous_task,
                });
            }
        }

        // The range always ends on an iteration that reports a finished status
        bail!("Loop {loop_id} exhausted its iterations without a final status")
    }

    async fn submit_iteration(
        &self,
        loop_id: Uuid,
        spec: &LoopSpec,
        iteration: u32,
        previous: Option<&Value>,
        previous_task: Option<Uuid>,
    ) -> Result<Uuid> {
        let payload = json!({
            "loop_id": loop_id,
            "iteration": iteration,
            "input": spec.payload,
            "previous": previous,
        });
        let mut submission = TaskSubmission::new(payload)
            .with_priority(spec.priority)
            .with_dedup_key(iteration_key(loop_id, iteration));
        if let Some(task_id) = previous_task {
            submission = submission.with_dependency(task_id);
        }

        self.coordinator
            .submit_idempotent(submission)
            .await
            .with_context(|| format!("Failed to submit iteration {iteration} of loop {loop_id}"))
    }

    async fn finish(
        &self,
        loop_id: Uuid,
        spec: &LoopSpec,
        status: LoopStatus,
        iterations: u32,
        result: Option<Value>,
        last_task_id: Option<Uuid>,
    ) -> Result<LoopOutcome> {
        self.save(
            loop_id,
            spec,
            status,
            iterations,
            result.clone().unwrap_or(Value::Null),
            last_task_id,
        )
        .await?;
        info!(%loop_id, iterations, %status, "Loop finished");
        Ok(LoopOutcome {
            loop_id,
            status,
            iterations,
            result,
            last_task_id,
        })
    }

    async fn save(
        &self,
        loop_id: Uuid,
        spec: &LoopSpec,
        status: LoopStatus,
        iteration: u32,
        progress: Value,
        last_task_id: Option<Uuid>,
    ) -> Result<()> {
        let checkpoint = Checkpoint {
            loop_id,
            iteration,
            status,
            progress,
            spec: spec.clone(),
            last_task_id,
            saved_at: self.coordinator.clock().now(),
        };
        self.coordinator
            .save_checkpoint(&checkpoint)
            .await
            .with_context(|| format!("Failed to checkpoint loop {loop_id} at iteration {iteration}"))
    }
}

impl Position {
    fn fresh() -> Self {
        Self {
            next_iteration: 1,
            previous: None,
            previous_task: None,
        }
    }
}

/// Dedup key of one iteration task.
pub fn iteration_key(loop_id: Uuid, iteration: u32) -> String {
    format!("loop:{loop_id}:{iteration}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome<'a>(iteration: u32, result: &'a Value, previous: Option<&'a Value>) -> IterationOutcome<'a> {
        IterationOutcome {
            iteration,
            result,
            previous,
        }
    }

    #[test]
    fn test_convergence_strategy_fixed() {
        let strategy = ConvergenceStrategy::Fixed { iterations: 3 };
        let result = json!(null);
        assert!(!strategy.is_converged(&outcome(2, &result, None)));
        assert!(strategy.is_converged(&outcome(3, &result, None)));
    }

    #[test]
    fn test_convergence_strategy_threshold() {
        let strategy = ConvergenceStrategy::Threshold {
            field: "score".to_string(),
            target: 0.9,
        };
        assert!(!strategy.is_converged(&outcome(1, &json!({}), None)));
        assert!(!strategy.is_converged(&outcome(1, &json!({"score": 0.5}), None)));
        assert!(strategy.is_converged(&outcome(1, &json!({"score": 0.95}), None)));

        let nested = ConvergenceStrategy::Threshold {
            field: "/metrics/score".to_string(),
            target: 1.0,
        };
        assert!(nested.is_converged(&outcome(1, &json!({"metrics": {"score": 1}}), None)));
    }

    #[test]
    fn test_convergence_strategy_adaptive() {
        let strategy = ConvergenceStrategy::Adaptive { min_change_rate: 0.05 };
        let first = json!(100.0);
        let far = json!(150.0);
        let near = json!(101.0);

        // Nothing to compare against yet
        assert!(!strategy.is_converged(&outcome(1, &first, None)));
        assert!(!strategy.is_converged(&outcome(2, &far, Some(&first))));
        assert!(strategy.is_converged(&outcome(2, &near, Some(&first))));
    }

    #[test]
    fn test_closure_is_a_convergence_check() {
        let check = |o: &IterationOutcome<'_>| o.result["done"] == json!(true);
        assert!(check.is_converged(&outcome(1, &json!({"done": true}), None)));
        assert!(!check.is_converged(&outcome(1, &json!({"done": false}), None)));
    }

    #[test]
    fn test_change_rate() {
        assert!(change_rate(&json!("hello"), &json!("hello")).abs() < f64::EPSILON);
        assert!(change_rate(&json!("hello"), &json!("world")) > 0.5);
        assert!(change_rate(&json!(0), &json!(0.0)).abs() < f64::EPSILON);
        assert!((change_rate(&json!(10), &json!(5)) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strategy_serde_shape() {
        let strategy: ConvergenceStrategy =
            serde_json::from_value(json!({"strategy": "threshold", "field": "score", "target": 0.8}))
                .unwrap();
        assert_eq!(
            strategy,
            ConvergenceStrategy::Threshold {
                field: "score".to_string(),
                target: 0.8
            }
        );
    }

    #[test]
    fn test_iteration_key() {
        let loop_id = Uuid::nil();
        assert_eq!(
            iteration_key(loop_id, 3),
            "loop:00000000-0000-0000-0000-000000000000:3"
        );
    }
}
