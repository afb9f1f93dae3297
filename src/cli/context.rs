//! Shared wiring for commands that touch the task database.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::adapters::sqlite::{initialize_database, PoolConfig, SqliteQueueStore};
use crate::application::TaskCoordinator;
use crate::domain::models::Config;

pub struct CliContext {
    pub config: Config,
    pub pool: SqlitePool,
    pub coordinator: Arc<TaskCoordinator>,
}

impl CliContext {
    /// Open (and migrate) the configured database and build a coordinator on it.
    pub async fn open(config: Config) -> Result<Self> {
        let database_url = format!("sqlite:{}", config.database.path);
        let pool_config = PoolConfig {
            max_connections: config.database.max_connections,
            ..PoolConfig::default()
        };
        let pool = initialize_database(&database_url, Some(pool_config))
            .await
            .with_context(|| format!("Failed to open database at {}", config.database.path))?;

        let store = Arc::new(SqliteQueueStore::new(pool.clone()));
        let coordinator = Arc::new(TaskCoordinator::new(store, &config));

        Ok(Self {
            config,
            pool,
            coordinator,
        })
    }
}
