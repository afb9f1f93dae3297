//! Short ID prefix resolution for CLI commands.
//!
//! Any unique prefix of a task UUID is accepted in place of the full ID,
//! similar to git short hashes.

use anyhow::{bail, Result};
use sqlx::SqlitePool;
use std::fmt::Write as _;
use uuid::Uuid;

const TASK_QUERY: &str = "SELECT id FROM tasks WHERE id LIKE ? ORDER BY id LIMIT 10";
const DEAD_LETTER_QUERY: &str = "SELECT task_id FROM dead_letters WHERE task_id LIKE ? ORDER BY task_id LIMIT 10";

/// Resolve a task ID prefix to a full UUID.
pub async fn resolve_task_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "task", TASK_QUERY).await
}

/// Resolve a prefix against dead-lettered tasks only.
pub async fn resolve_dead_letter_id(pool: &SqlitePool, prefix: &str) -> Result<Uuid> {
    resolve_prefix(pool, prefix, "dead letter", DEAD_LETTER_QUERY).await
}

fn validate_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        bail!("ID prefix must not be empty");
    }
    if !prefix.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        bail!("Invalid ID prefix '{prefix}': must contain only hex characters and dashes");
    }
    Ok(())
}

async fn resolve_prefix(pool: &SqlitePool, prefix: &str, entity: &str, query: &str) -> Result<Uuid> {
    if let Ok(uuid) = Uuid::parse_str(prefix) {
        return Ok(uuid);
    }

    validate_prefix(prefix)?;

    let pattern = format!("{}%", prefix.to_lowercase());
    let rows: Vec<(String,)> = sqlx::query_as(query).bind(&pattern).fetch_all(pool).await?;

    match rows.as_slice() {
        [] => bail!("No {entity} found matching '{prefix}'"),
        [(id,)] => Ok(Uuid::parse_str(id)?),
        _ => {
            let mut msg = format!("Ambiguous prefix '{prefix}' matches several {entity}s:");
            for (id,) in &rows {
                let _ = write!(msg, "\n  {id}");
            }
            bail!("{msg}")
        }
    }
}
