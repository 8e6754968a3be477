use async_trait::async_trait;
use chrono::{DateTime, Utc};
use krepro_common::model::{Task, TaskId, TaskStatus, TaskType};
use sqlx::{FromRow, PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TaskRepoError {
    #[error("task {0} not found")]
    NotFound(TaskId),
    #[error("task {0} is not pending, cannot be claimed")]
    NotPending(TaskId),
    #[error("task {0} is already terminal")]
    AlreadyTerminal(TaskId),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[async_trait]
pub trait TaskRepo: Send + Sync {
    async fn create(&self, task: &Task) -> Result<(), TaskRepoError>;
    async fn get(&self, id: TaskId) -> Result<Task, TaskRepoError>;
    async fn list(&self) -> Result<Vec<Task>, TaskRepoError>;
    async fn delete(&self, id: TaskId) -> Result<(), TaskRepoError>;

    /// Claims a pending task for `worker_id` inside a single serializable
    /// transaction: selects the row `for update`, validates `status=pending`
    /// and an empty `worker_id`, then writes `status=running`. Exactly one
    /// concurrent caller succeeds against the same row.
    async fn claim(&self, id: TaskId, worker_id: &str) -> Result<Task, TaskRepoError>;

    /// Sets a terminal status. Rejects rows that are already terminal.
    async fn set_terminal_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: String,
    ) -> Result<Task, TaskRepoError>;

    async fn set_artifact(
        &self,
        id: TaskId,
        artifact_path: &str,
        artifact_name: &str,
    ) -> Result<(), TaskRepoError>;
}

pub struct DbTaskRepo {
    pool: PgPool,
}

impl DbTaskRepo {
    pub fn new(pool: PgPool) -> Self {
        DbTaskRepo { pool }
    }
}

struct TaskRow {
    id: Uuid,
    task_type: String,
    status: String,
    payload: serde_json::Value,
    worker_id: String,
    result: Option<String>,
    artifact_path: Option<String>,
    artifact_name: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for TaskRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        Ok(TaskRow {
            id: row.try_get("id")?,
            task_type: row.try_get("task_type")?,
            status: row.try_get("status")?,
            payload: row.try_get("payload")?,
            worker_id: row.try_get("worker_id")?,
            result: row.try_get("result")?,
            artifact_path: row.try_get("artifact_path")?,
            artifact_name: row.try_get("artifact_name")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }
}

fn task_type_str(t: &TaskType) -> &'static str {
    match t {
        TaskType::KernelBuild => "kernel-build",
        TaskType::PatchApply => "patch-apply",
    }
}

fn parse_task_type(s: &str) -> TaskType {
    match s {
        "patch-apply" => TaskType::PatchApply,
        _ => TaskType::KernelBuild,
    }
}

fn status_str(s: TaskStatus) -> &'static str {
    match s {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Success => "success",
        TaskStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> TaskStatus {
    match s {
        "running" => TaskStatus::Running,
        "success" => TaskStatus::Success,
        "failed" => TaskStatus::Failed,
        _ => TaskStatus::Pending,
    }
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: TaskId(row.id),
            task_type: parse_task_type(&row.task_type),
            status: parse_status(&row.status),
            payload: row.payload,
            worker_id: row.worker_id,
            result: row.result,
            artifact_path: row.artifact_path,
            artifact_name: row.artifact_name,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

#[async_trait]
impl TaskRepo for DbTaskRepo {
    async fn create(&self, task: &Task) -> Result<(), TaskRepoError> {
        sqlx::query(
            "insert into tasks (id, task_type, status, payload, worker_id, created_at) \
             values ($1, $2, $3, $4, $5, $6)",
        )
        .bind(task.id.0)
        .bind(task_type_str(&task.task_type))
        .bind(status_str(task.status))
        .bind(&task.payload)
        .bind(&task.worker_id)
        .bind(task.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Task, TaskRepoError> {
        let row = sqlx::query_as::<_, TaskRow>("select * from tasks where id = $1")
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(TaskRepoError::NotFound(id))?;
        Ok(row.into())
    }

    async fn list(&self) -> Result<Vec<Task>, TaskRepoError> {
        let rows = sqlx::query_as::<_, TaskRow>("select * from tasks order by created_at desc")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    async fn delete(&self, id: TaskId) -> Result<(), TaskRepoError> {
        let result = sqlx::query("delete from tasks where id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(TaskRepoError::NotFound(id));
        }
        Ok(())
    }

    async fn claim(&self, id: TaskId, worker_id: &str) -> Result<Task, TaskRepoError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>("select * from tasks where id = $1 for update")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TaskRepoError::NotFound(id))?;

        if row.status != "pending" || !row.worker_id.is_empty() {
            return Err(TaskRepoError::NotPending(id));
        }

        let started_at = Utc::now();
        let updated = sqlx::query_as::<_, TaskRow>(
            "update tasks set status = 'running', worker_id = $2, started_at = $3 \
             where id = $1 returning *",
        )
        .bind(id.0)
        .bind(worker_id)
        .bind(started_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.into())
    }

    async fn set_terminal_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: String,
    ) -> Result<Task, TaskRepoError> {
        if !status.is_terminal() {
            return Err(TaskRepoError::NotPending(id));
        }

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TaskRow>("select * from tasks where id = $1 for update")
            .bind(id.0)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(TaskRepoError::NotFound(id))?;

        if parse_status(&row.status).is_terminal() {
            return Err(TaskRepoError::AlreadyTerminal(id));
        }

        let finished_at = Utc::now();
        let updated = sqlx::query_as::<_, TaskRow>(
            "update tasks set status = $2, result = $3, finished_at = $4 \
             where id = $1 returning *",
        )
        .bind(id.0)
        .bind(status_str(status))
        .bind(&result)
        .bind(finished_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated.into())
    }

    async fn set_artifact(
        &self,
        id: TaskId,
        artifact_path: &str,
        artifact_name: &str,
    ) -> Result<(), TaskRepoError> {
        let result = sqlx::query(
            "update tasks set artifact_path = $2, artifact_name = $3 where id = $1",
        )
        .bind(id.0)
        .bind(artifact_path)
        .bind(artifact_name)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(TaskRepoError::NotFound(id));
        }
        Ok(())
    }
}
