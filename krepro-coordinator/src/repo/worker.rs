use async_trait::async_trait;
use chrono::{DateTime, Utc};
use krepro_common::model::{Worker, WorkerStatus};
use sqlx::{FromRow, PgPool, Row};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerRepoError {
    #[error("worker {0} not found")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    async fn find(&self, worker_id: &str) -> Result<Option<Worker>, WorkerRepoError>;

    async fn insert(&self, worker: &Worker) -> Result<(), WorkerRepoError>;

    async fn mark_online(
        &self,
        worker_id: &str,
        hostname: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), WorkerRepoError>;

    async fn mark_offline(&self, worker_id: &str) -> Result<(), WorkerRepoError>;
}

pub struct DbWorkerRepo {
    pool: PgPool,
}

impl DbWorkerRepo {
    pub fn new(pool: PgPool) -> Self {
        DbWorkerRepo { pool }
    }
}

struct WorkerRow {
    worker_id: String,
    api_key_hash: String,
    hostname: String,
    status: String,
    last_seen: DateTime<Utc>,
}

impl FromRow<'_, sqlx::postgres::PgRow> for WorkerRow {
    fn from_row(row: &sqlx::postgres::PgRow) -> sqlx::Result<Self> {
        Ok(WorkerRow {
            worker_id: row.try_get("worker_id")?,
            api_key_hash: row.try_get("api_key_hash")?,
            hostname: row.try_get("hostname")?,
            status: row.try_get("status")?,
            last_seen: row.try_get("last_seen")?,
        })
    }
}

impl From<WorkerRow> for Worker {
    fn from(row: WorkerRow) -> Self {
        Worker {
            worker_id: row.worker_id,
            api_key_hash: row.api_key_hash,
            hostname: row.hostname,
            status: if row.status == "online" {
                WorkerStatus::Online
            } else {
                WorkerStatus::Offline
            },
            last_seen: row.last_seen,
        }
    }
}

#[async_trait]
impl WorkerRepo for DbWorkerRepo {
    async fn find(&self, worker_id: &str) -> Result<Option<Worker>, WorkerRepoError> {
        let row = sqlx::query_as::<_, WorkerRow>("select * from workers where worker_id = $1")
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Worker::from))
    }

    async fn insert(&self, worker: &Worker) -> Result<(), WorkerRepoError> {
        sqlx::query(
            "insert into workers (worker_id, api_key_hash, hostname, status, last_seen) \
             values ($1, $2, $3, $4, $5)",
        )
        .bind(&worker.worker_id)
        .bind(&worker.api_key_hash)
        .bind(&worker.hostname)
        .bind("online")
        .bind(worker.last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_online(
        &self,
        worker_id: &str,
        hostname: &str,
        last_seen: DateTime<Utc>,
    ) -> Result<(), WorkerRepoError> {
        let result = sqlx::query(
            "update workers set status = 'online', hostname = $2, last_seen = $3 where worker_id = $1",
        )
        .bind(worker_id)
        .bind(hostname)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(WorkerRepoError::NotFound(worker_id.to_string()));
        }
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> Result<(), WorkerRepoError> {
        sqlx::query("update workers set status = 'offline' where worker_id = $1")
            .bind(worker_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
