//! SQLite implementation of the QueueStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::QueryAs;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnection};
use sqlx::SqlitePool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    format_timestamp, parse_datetime, parse_json_or_default, parse_optional_datetime,
    parse_optional_uuid, parse_uuid,
};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Checkpoint, DeadLetterEntry, FailureClass, LoopStatus, Task, TaskStatus,
};
use crate::domain::ports::{QueueStore, TaskFilter};

/// Tasks per `IN (...)` lookup when loading dependency sets.
const DEPENDENCY_BATCH: usize = 500;

#[derive(Clone)]
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// `EXPLAIN QUERY PLAN` details for the statement `list` would run.
    pub async fn explain_list_plan(&self, filter: &TaskFilter) -> DomainResult<Vec<String>> {
        let sql = format!("EXPLAIN QUERY PLAN {}", list_sql(filter));
        let rows: Vec<(i64, i64, i64, String)> = bind_filter(sqlx::query_as(&sql), filter)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(_, _, _, detail)| detail).collect())
    }

    async fn insert(&self, task: &Task) -> DomainResult<Task> {
        let payload_json = serde_json::to_string(&task.payload)?;
        let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let attempts_json = serde_json::to_string(&task.attempts)?;

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"INSERT INTO tasks (id, priority, status, payload, retry_count, max_retries,
               next_eligible_at, dedup_key, claimed_by, heartbeat_at, result, last_error,
               failure_class, attempts, version, created_at, updated_at, started_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, ?, ?)"#
        )
        .bind(task.id.to_string())
        .bind(i64::from(task.priority))
        .bind(task.status.as_str())
        .bind(&payload_json)
        .bind(i64::from(task.retry_count))
        .bind(i64::from(task.max_retries))
        .bind(format_timestamp(task.next_eligible_at))
        .bind(&task.dedup_key)
        .bind(&task.claimed_by)
        .bind(task.heartbeat_at.map(format_timestamp))
        .bind(&result_json)
        .bind(&task.last_error)
        .bind(task.failure_class.map(|c| c.as_str()))
        .bind(&attempts_json)
        .bind(format_timestamp(task.created_at))
        .bind(format_timestamp(task.updated_at))
        .bind(task.started_at.map(format_timestamp))
        .bind(task.completed_at.map(format_timestamp))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_write_error(e, task.id))?;

        for dep_id in &task.depends_on {
            sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)")
                .bind(task.id.to_string())
                .bind(dep_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_write_error(e, task.id))?;
        }

        tx.commit().await?;

        let mut stored = task.clone();
        stored.version = 1;
        stored.seq = inserted.last_insert_rowid();
        Ok(stored)
    }

    async fn attach_dependencies(&self, tasks: &mut [Task]) -> DomainResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let mut deps: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for chunk in tasks.chunks(DEPENDENCY_BATCH) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT task_id, depends_on_id FROM task_dependencies WHERE task_id IN ({placeholders}) ORDER BY rowid"
            );
            let mut query = sqlx::query_as::<_, (String, String)>(&sql);
            for task in chunk {
                query = query.bind(task.id.to_string());
            }
            for (task_id, dep_id) in query.fetch_all(&self.pool).await? {
                deps.entry(parse_uuid(&task_id)?).or_default().push(parse_uuid(&dep_id)?);
            }
        }

        for task in tasks.iter_mut() {
            task.depends_on = deps.remove(&task.id).unwrap_or_default();
        }
        Ok(())
    }

    async fn hydrate(&self, rows: Vec<TaskRow>) -> DomainResult<Vec<Task>> {
        let mut tasks = rows.into_iter().map(Task::try_from).collect::<DomainResult<Vec<_>>>()?;
        self.attach_dependencies(&mut tasks).await?;
        Ok(tasks)
    }

    async fn hydrate_one(&self, row: Option<TaskRow>) -> DomainResult<Option<Task>> {
        match row {
            Some(r) => Ok(self.hydrate(vec![r]).await?.pop()),
            None => Ok(None),
        }
    }
}

/// Compare-and-swap a task row on `version`. Dependencies are immutable
/// after insert and are not rewritten.
async fn update_row(conn: &mut SqliteConnection, task: &Task) -> DomainResult<Task> {
    let payload_json = serde_json::to_string(&task.payload)?;
    let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
    let attempts_json = serde_json::to_string(&task.attempts)?;

    let result = sqlx::query(
        r#"UPDATE tasks SET priority = ?, status = ?, payload = ?, retry_count = ?,
           max_retries = ?, next_eligible_at = ?, claimed_by = ?, heartbeat_at = ?,
           result = ?, last_error = ?, failure_class = ?, attempts = ?,
           version = version + 1, updated_at = ?, started_at = ?, completed_at = ?
           WHERE id = ? AND version = ?"#
    )
    .bind(i64::from(task.priority))
    .bind(task.status.as_str())
    .bind(&payload_json)
    .bind(i64::from(task.retry_count))
    .bind(i64::from(task.max_retries))
    .bind(format_timestamp(task.next_eligible_at))
    .bind(&task.claimed_by)
    .bind(task.heartbeat_at.map(format_timestamp))
    .bind(&result_json)
    .bind(&task.last_error)
    .bind(task.failure_class.map(|c| c.as_str()))
    .bind(&attempts_json)
    .bind(format_timestamp(task.updated_at))
    .bind(task.started_at.map(format_timestamp))
    .bind(task.completed_at.map(format_timestamp))
    .bind(task.id.to_string())
    .bind(task.version as i64)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_write_error(e, task.id))?;

    if result.rows_affected() == 0 {
        let (exists,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE id = ?")
            .bind(task.id.to_string())
            .fetch_one(&mut *conn)
            .await?;
        return Err(if exists == 0 {
            DomainError::TaskNotFound(task.id)
        } else {
            DomainError::task_conflict(task.id)
        });
    }

    let mut stored = task.clone();
    stored.version = task.version + 1;
    Ok(stored)
}

fn map_write_error(err: sqlx::Error, task_id: Uuid) -> DomainError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return DomainError::task_conflict(task_id);
        }
        if db.is_foreign_key_violation() {
            return DomainError::Validation(format!("task {task_id} references an unknown task"));
        }
    }
    err.into()
}

fn list_sql(filter: &TaskFilter) -> String {
    let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filter.min_priority.is_some() {
        sql.push_str(" AND priority >= ?");
    }
    sql.push_str(" ORDER BY priority DESC, seq");
    if filter.limit.is_some() || filter.offset.is_some() {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    sql
}

fn bind_filter<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    filter: &TaskFilter,
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(min_priority) = filter.min_priority {
        query = query.bind(i64::from(min_priority));
    }
    if filter.limit.is_some() || filter.offset.is_some() {
        // LIMIT -1 is unbounded in SQLite
        query = query
            .bind(filter.limit.map_or(-1, |l| l as i64))
            .bind(filter.offset.unwrap_or(0) as i64);
    }
    query
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn put(&self, task: &Task) -> DomainResult<Task> {
        if task.version == 0 {
            return self.insert(task).await;
        }
        let mut conn = self.pool.acquire().await?;
        update_row(&mut conn, task).await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }

    async fn get_by_dedup_key(&self, key: &str) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE dedup_key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate_one(row).await
    }

    async fn get_ready(&self, limit: usize, now: DateTime<Utc>, claimant: &str) -> DomainResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let now_str = format_timestamp(now);

        // Selection and claim are one statement, so two callers can never
        // both observe the same row as pending.
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"UPDATE tasks
               SET status = 'claimed', claimed_by = ?, heartbeat_at = ?, updated_at = ?,
                   version = version + 1
               WHERE id IN (
                   SELECT t.id FROM tasks t
                   WHERE t.status = 'pending'
                     AND t.next_eligible_at <= ?
                     AND NOT EXISTS (
                         SELECT 1 FROM task_dependencies d
                         INNER JOIN tasks dep ON dep.id = d.depends_on_id
                         WHERE d.task_id = t.id AND dep.status != 'completed'
                     )
                   ORDER BY t.priority DESC, t.seq
                   LIMIT ?
               )
               RETURNING *"#
        )
        .bind(claimant)
        .bind(&now_str)
        .bind(&now_str)
        .bind(&now_str)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = self.hydrate(rows).await?;
        // RETURNING order is unspecified
        tasks.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
        Ok(tasks)
    }

    async fn get_dependents(&self, task_id: Uuid) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT t.* FROM tasks t
               INNER JOIN task_dependencies d ON t.id = d.task_id
               WHERE d.depends_on_id = ?
               ORDER BY t.seq"#
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        self.hydrate(rows).await
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<Task>> {
        let sql = list_sql(&filter);
        let rows: Vec<TaskRow> = bind_filter(sqlx::query_as(&sql), &filter)
            .fetch_all(&self.pool)
            .await?;
        self.hydrate(rows).await
    }

    async fn count_by_status(&self) -> DomainResult<HashMap<TaskStatus, u64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM tasks GROUP BY status"
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (status_str, count) in rows {
            if let Some(status) = TaskStatus::from_str(&status_str) {
                counts.insert(status, count as u64);
            }
        }
        Ok(counts)
    }

    async fn touch_heartbeat(&self, task_id: Uuid, at: DateTime<Utc>) -> DomainResult<bool> {
        // Heartbeats do not bump the version; they must never make a
        // concurrent state transition fail.
        let result = sqlx::query(
            "UPDATE tasks SET heartbeat_at = ? WHERE id = ? AND status IN ('claimed', 'running')"
        )
        .bind(format_timestamp(at))
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recover_stale(&self, stale_before: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<Vec<Uuid>> {
        let now_str = format_timestamp(now);
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"UPDATE tasks
               SET status = 'pending', claimed_by = NULL, heartbeat_at = NULL, started_at = NULL,
                   next_eligible_at = ?, updated_at = ?, version = version + 1
               WHERE status IN ('claimed', 'running')
                 AND (heartbeat_at IS NULL OR heartbeat_at < ?)
               RETURNING id"#
        )
        .bind(&now_str)
        .bind(&now_str)
        .bind(format_timestamp(stale_before))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|(id,)| parse_uuid(&id)).collect()
    }

    async fn dead_letter(&self, task: &Task, entry: &DeadLetterEntry) -> DomainResult<Task> {
        let history_json = serde_json::to_string(&entry.failure_history)?;

        let mut tx = self.pool.begin().await?;
        let stored = update_row(&mut tx, task).await?;
        sqlx::query(
            r#"INSERT INTO dead_letters (task_id, failure_history, classification, last_error, dead_lettered_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT(task_id) DO UPDATE SET
                   failure_history = excluded.failure_history,
                   classification = excluded.classification,
                   last_error = excluded.last_error,
                   dead_lettered_at = excluded.dead_lettered_at"#
        )
        .bind(entry.task_id.to_string())
        .bind(&history_json)
        .bind(entry.classification.as_str())
        .bind(&entry.last_error)
        .bind(format_timestamp(entry.dead_lettered_at))
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(stored)
    }

    async fn revive(&self, task: &Task) -> DomainResult<Task> {
        let mut tx = self.pool.begin().await?;
        let stored = update_row(&mut tx, task).await?;
        sqlx::query("DELETE FROM dead_letters WHERE task_id = ?")
            .bind(task.id.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get_dead_letter(&self, task_id: Uuid) -> DomainResult<Option<DeadLetterEntry>> {
        let row: Option<DeadLetterRow> = sqlx::query_as("SELECT * FROM dead_letters WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(DeadLetterEntry::try_from).transpose()
    }

    async fn list_dead_letters(&self, limit: usize) -> DomainResult<Vec<DeadLetterEntry>> {
        let rows: Vec<DeadLetterRow> = sqlx::query_as(
            "SELECT * FROM dead_letters ORDER BY dead_lettered_at DESC LIMIT ?"
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(DeadLetterEntry::try_from).collect()
    }

    async fn purge_dead_letter(&self, task_id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("DELETE FROM dead_letters WHERE task_id = ?")
            .bind(task_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> DomainResult<()> {
        let progress_json = serde_json::to_string(&checkpoint.progress)?;
        let spec_json = serde_json::to_string(&checkpoint.spec)?;

        sqlx::query(
            r#"INSERT INTO checkpoints (loop_id, iteration, status, progress, spec, last_task_id, saved_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(loop_id) DO UPDATE SET
                   iteration = excluded.iteration,
                   status = excluded.status,
                   progress = excluded.progress,
                   spec = excluded.spec,
                   last_task_id = excluded.last_task_id,
                   saved_at = excluded.saved_at"#
        )
        .bind(checkpoint.loop_id.to_string())
        .bind(i64::from(checkpoint.iteration))
        .bind(checkpoint.status.as_str())
        .bind(&progress_json)
        .bind(&spec_json)
        .bind(checkpoint.last_task_id.map(|id| id.to_string()))
        .bind(format_timestamp(checkpoint.saved_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_latest_checkpoint(&self, loop_id: Uuid) -> DomainResult<Option<Checkpoint>> {
        let row: Option<CheckpointRow> = sqlx::query_as("SELECT * FROM checkpoints WHERE loop_id = ?")
            .bind(loop_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Checkpoint::try_from).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    seq: i64,
    id: String,
    priority: i64,
    status: String,
    payload: String,
    retry_count: i64,
    max_retries: i64,
    next_eligible_at: String,
    dedup_key: Option<String>,
    claimed_by: Option<String>,
    heartbeat_at: Option<String>,
    result: Option<String>,
    last_error: Option<String>,
    failure_class: Option<String>,
    attempts: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::Serialization(format!("Invalid status: {}", row.status)))?;

        let failure_class = row
            .failure_class
            .map(|s| {
                FailureClass::from_str(&s)
                    .ok_or_else(|| DomainError::Serialization(format!("Invalid failure class: {s}")))
            })
            .transpose()?;

        let result = row.result.map(|s| serde_json::from_str(&s)).transpose()?;

        Ok(Task {
            id: parse_uuid(&row.id)?,
            priority: row.priority as i32,
            status,
            payload: serde_json::from_str(&row.payload)?,
            depends_on: Vec::new(), // Loaded separately
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            next_eligible_at: parse_datetime(&row.next_eligible_at)?,
            dedup_key: row.dedup_key,
            claimed_by: row.claimed_by,
            heartbeat_at: parse_optional_datetime(row.heartbeat_at)?,
            result,
            last_error: row.last_error,
            failure_class,
            attempts: parse_json_or_default(row.attempts)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            version: row.version as u64,
            seq: row.seq,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DeadLetterRow {
    task_id: String,
    failure_history: Option<String>,
    classification: String,
    last_error: String,
    dead_lettered_at: String,
}

impl TryFrom<DeadLetterRow> for DeadLetterEntry {
    type Error = DomainError;

    fn try_from(row: DeadLetterRow) -> Result<Self, Self::Error> {
        let classification = FailureClass::from_str(&row.classification).ok_or_else(|| {
            DomainError::Serialization(format!("Invalid failure class: {}", row.classification))
        })?;

        Ok(DeadLetterEntry {
            task_id: parse_uuid(&row.task_id)?,
            failure_history: parse_json_or_default(row.failure_history)?,
            classification,
            last_error: row.last_error,
            dead_lettered_at: parse_datetime(&row.dead_lettered_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    loop_id: String,
    iteration: i64,
    status: String,
    progress: String,
    spec: String,
    last_task_id: Option<String>,
    saved_at: String,
}

impl TryFrom<CheckpointRow> for Checkpoint {
    type Error = DomainError;

    fn try_from(row: CheckpointRow) -> Result<Self, Self::Error> {
        let status = LoopStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::Serialization(format!("Invalid loop status: {}", row.status)))?;

        Ok(Checkpoint {
            loop_id: parse_uuid(&row.loop_id)?,
            iteration: row.iteration as u32,
            status,
            progress: serde_json::from_str(&row.progress)?,
            spec: serde_json::from_str(&row.spec)?,
            last_task_id: parse_optional_uuid(row.last_task_id)?,
            saved_at: parse_datetime(&row.saved_at)?,
        })
    }
}
