//! Implementation of the `brood init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::config::PROJECT_DIR;

const CONFIG_FILE: &str = "config.yaml";
const DATABASE_FILE: &str = "brood.db";

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Rewrite config.yaml with defaults even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_path: PathBuf,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push(format!("\nWrote {PROJECT_DIR}/{CONFIG_FILE}"));
        }
        if self.success {
            lines.push(format!("Database ready at {}", self.database_path.display()));
        }
        lines.join("\n")
    }
}

/// Default configuration as written by `brood init`.
fn default_config_yaml() -> Result<String> {
    let config = Config::default();
    let yaml = serde_yaml::to_string(&config).context("Failed to serialize default configuration")?;
    Ok(format!(
        "# brood configuration. Values can be overridden in local.yaml or via BROOD_* variables,\n\
         # e.g. BROOD_SWARM__MAX_AGENTS=8.\n{yaml}"
    ))
}

pub async fn execute(args: InitArgs, _config: Config, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let project_dir = target_path.join(PROJECT_DIR);
    let config_path = project_dir.join(CONFIG_FILE);
    let database_path = project_dir.join(DATABASE_FILE);

    if config_path.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to rewrite the configuration.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_path,
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    let directories_created = create_directories(&target_path, &[project_dir.clone(), project_dir.join("logs")]).await?;

    fs::write(&config_path, default_config_yaml()?)
        .await
        .with_context(|| format!("Failed to write {}", config_path.display()))?;

    // Existing queue data is kept; only pending migrations are applied.
    let db_url = format!("sqlite:{}", database_path.display());
    let pool = initialize_database(&db_url, None)
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_path,
    };

    output(&output_data, json_mode);
    Ok(())
}

async fn create_directories(root: &Path, dirs: &[PathBuf]) -> Result<Vec<String>> {
    let mut created = Vec::new();
    for dir in dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            created.push(dir.strip_prefix(root).unwrap_or(dir).to_string_lossy().to_string());
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ConfigLoader;

    #[tokio::test]
    async fn test_init_creates_project_layout() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs {
            force: false,
            path: dir.path().to_path_buf(),
        };

        execute(args, Config::default(), true).await.unwrap();

        let project_dir = dir.path().join(PROJECT_DIR);
        assert!(project_dir.join(CONFIG_FILE).exists());
        assert!(project_dir.join(DATABASE_FILE).exists());
        assert!(project_dir.join("logs").is_dir());
    }

    #[test]
    fn test_default_config_yaml_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, default_config_yaml().unwrap()).unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.swarm.max_agents, Config::default().swarm.max_agents);
        assert_eq!(config.database.path, ".brood/brood.db");
    }
}
