//! Common test utilities for integration tests
//!
//! Provides shared fixtures used across the integration test files: queue
//! stores over in-memory or on-disk SQLite, coordinators on a manual clock
//! and a polling helper.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use brood::adapters::sqlite::{create_migrated_test_pool, initialize_database, PoolConfig, SqliteQueueStore};
use brood::application::TaskCoordinator;
use brood::domain::models::Config;
use brood::domain::ports::ManualClock;
use sqlx::SqlitePool;

/// In-memory store with all migrations applied.
pub async fn memory_store() -> Arc<SqliteQueueStore> {
    let pool = create_migrated_test_pool()
        .await
        .expect("failed to create test database");
    Arc::new(SqliteQueueStore::new(pool))
}

/// File-backed pool with several connections, for concurrency and restart tests.
pub async fn file_pool(path: &Path) -> SqlitePool {
    let url = format!("sqlite:{}", path.display());
    let config = PoolConfig {
        max_connections: 8,
        ..PoolConfig::default()
    };
    initialize_database(&url, Some(config))
        .await
        .expect("failed to open file database")
}

/// Coordinator over a fresh in-memory store driven by a manual clock.
pub async fn coordinator() -> (Arc<TaskCoordinator>, ManualClock) {
    coordinator_with(&Config::default()).await
}

pub async fn coordinator_with(config: &Config) -> (Arc<TaskCoordinator>, ManualClock) {
    let clock = ManualClock::default();
    let coordinator = TaskCoordinator::new(memory_store().await, config).with_clock(Arc::new(clock.clone()));
    (Arc::new(coordinator), clock)
}

/// Coordinator on the system clock, for tests that run real agents.
pub async fn live_coordinator(config: &Config) -> Arc<TaskCoordinator> {
    Arc::new(TaskCoordinator::new(memory_store().await, config))
}

/// Poll `predicate` every 20ms until it returns true or `timeout` elapses.
pub async fn wait_for<F, Fut>(mut predicate: F, timeout: Duration) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if predicate().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
