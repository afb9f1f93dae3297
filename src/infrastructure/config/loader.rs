use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::application::MAX_AGENTS;
use crate::domain::models::config::Config;

/// Directory holding project configuration and the default database
pub const PROJECT_DIR: &str = ".brood";

/// Prefix of environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "BROOD_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_agents: {0}. Must be between 1 and 100")]
    InvalidMaxAgents(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid backoff multiplier: {0}. Must be at least 1.0")]
    InvalidMultiplier(f64),

    #[error("Invalid jitter: {0}. Must be in [0, 1)")]
    InvalidJitter(f64),

    #[error(
        "Invalid heartbeat configuration: heartbeat_timeout_ms ({1}) must exceed heartbeat_interval_ms ({0})"
    )]
    InvalidHeartbeat(u64, u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .brood/config.yaml (project config, created by init)
    /// 3. .brood/local.yaml (project local overrides, optional)
    /// 4. Environment variables (BROOD_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        Self::load_from(Path::new(PROJECT_DIR))
    }

    /// Same as [`ConfigLoader::load`] with an explicit project directory.
    pub fn load_from(project_dir: &Path) -> Result<Config> {
        let config: Config = Self::figment(project_dir)
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment(project_dir: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(project_dir.join("config.yaml")))
            .merge(Yaml::file(project_dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let swarm = &config.swarm;
        if swarm.max_agents == 0 || swarm.max_agents > MAX_AGENTS {
            return Err(ConfigError::InvalidMaxAgents(swarm.max_agents));
        }
        if swarm.heartbeat_timeout_ms <= swarm.heartbeat_interval_ms {
            return Err(ConfigError::InvalidHeartbeat(
                swarm.heartbeat_interval_ms,
                swarm.heartbeat_timeout_ms,
            ));
        }
        if swarm.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "swarm.poll_interval_ms must be positive".to_string(),
            ));
        }

        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }
        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        let retry = &config.retry;
        if retry.initial_backoff_ms > retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                retry.initial_backoff_ms,
                retry.max_backoff_ms,
            ));
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidMultiplier(retry.multiplier));
        }
        if !(0.0..1.0).contains(&retry.jitter) {
            return Err(ConfigError::InvalidJitter(retry.jitter));
        }

        // A task still supervised by a live slot must not look stale
        if config.recovery.stale_after_secs.saturating_mul(1_000) <= swarm.heartbeat_timeout_ms {
            return Err(ConfigError::ValidationFailed(format!(
                "recovery.stale_after_secs ({}) must exceed swarm.heartbeat_timeout_ms ({})",
                config.recovery.stale_after_secs, swarm.heartbeat_timeout_ms
            )));
        }

        if config.loops.max_iterations == 0 {
            return Err(ConfigError::ValidationFailed(
                "loops.max_iterations must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
