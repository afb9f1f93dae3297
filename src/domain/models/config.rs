use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure for Brood
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry policy configuration
    #[serde(default)]
    pub retry: RetryConfig,

    /// Agent pool configuration
    #[serde(default)]
    pub swarm: SwarmConfig,

    /// Crash recovery configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Queue intake configuration
    #[serde(default)]
    pub queue: QueueConfig,

    /// Iterative loop configuration
    #[serde(default)]
    pub loops: LoopConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".brood/brood.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for JSON log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Rotation for file logs: daily, hourly, never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Default retry budget for submitted tasks
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Upper bound on any single retry delay
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Growth factor between consecutive delays
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Randomization factor in [0, 1)
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    10_000
}

const fn default_max_backoff_ms() -> u64 {
    300_000
}

const fn default_multiplier() -> f64 {
    2.0
}

const fn default_jitter() -> f64 {
    0.2
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

/// Agent pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SwarmConfig {
    /// Number of concurrent agent slots (1-100)
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    /// Idle slot poll interval when no wake-up arrives
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Expected agent heartbeat interval
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a busy slot is declared crashed
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// How long `stop` waits for in-flight tasks
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Periodic stale-task sweep; 0 disables it
    #[serde(default)]
    pub recovery_sweep_interval_secs: u64,
}

const fn default_max_agents() -> usize {
    4
}

const fn default_poll_interval_ms() -> u64 {
    1_000
}

const fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

const fn default_heartbeat_timeout_ms() -> u64 {
    30_000
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            poll_interval_ms: default_poll_interval_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            recovery_sweep_interval_secs: 0,
        }
    }
}

impl SwarmConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Crash recovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RecoveryConfig {
    /// Claimed/Running tasks without a heartbeat for this long are reset
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

const fn default_stale_after_secs() -> u64 {
    60
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

/// Queue intake configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueueConfig {
    /// Honour client-supplied dedup keys
    #[serde(default = "default_true")]
    pub dedup_enabled: bool,

    /// Consecutive storage failures before submissions are refused
    #[serde(default = "default_storage_failure_threshold")]
    pub storage_failure_threshold: u32,

    /// Internal retries of an operation that lost an optimistic-concurrency race
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_storage_failure_threshold() -> u32 {
    5
}

const fn default_conflict_retries() -> u32 {
    5
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            dedup_enabled: default_true(),
            storage_failure_threshold: default_storage_failure_threshold(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

/// Iterative loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoopConfig {
    /// Default iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Fallback poll while waiting for an iteration task
    #[serde(default = "default_loop_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_loop_poll_interval_ms() -> u64 {
    500
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            poll_interval_ms: default_loop_poll_interval_ms(),
        }
    }
}
