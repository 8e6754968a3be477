use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn generate() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskType {
    KernelBuild,
    PatchApply,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A unit of work: one crash reproduction run.
///
/// Invariants (see SPEC_FULL.md §3): `status=pending` implies an empty `worker_id`;
/// any non-pending status implies a non-empty `worker_id`; a terminal status implies
/// `finished_at` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub payload: serde_json::Value,
    pub worker_id: String,
    pub result: Option<String>,
    pub artifact_path: Option<String>,
    pub artifact_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(task_type: TaskType, payload: serde_json::Value) -> Self {
        Task {
            id: TaskId::generate(),
            task_type,
            status: TaskStatus::Pending,
            payload,
            worker_id: String::new(),
            result: None,
            artifact_path: None,
            artifact_name: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Reads `payload.crashes[0].kernel-source-commit`, the only field of the
    /// opaque crash descriptor the core ever inspects (used to derive the
    /// conventional artifact path, see SPEC_FULL.md §4.5).
    pub fn kernel_source_commit(&self) -> Option<&str> {
        self.payload
            .get("crashes")?
            .get(0)?
            .get("kernel-source-commit")?
            .as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Offline,
}

/// A registered executor holding a secret; one consumer of the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: String,
    pub api_key_hash: String,
    pub hostname: String,
    pub status: WorkerStatus,
    pub last_seen: DateTime<Utc>,
}

/// Wire record sent by a worker agent's child-process line scanner to the log
/// ingest endpoint. Fixed per SPEC_FULL.md §9: `level` is deliberately not part of
/// this contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub client_id: String,
    pub task_id: TaskId,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// The JSON envelope the Log Hub fans out to push subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEnvelope {
    #[serde(rename = "taskId")]
    pub task_id: TaskId,
    pub time: DateTime<Utc>,
    pub message: String,
}

impl From<LogMessage> for LogEnvelope {
    fn from(msg: LogMessage) -> Self {
        LogEnvelope {
            task_id: msg.task_id,
            time: msg.timestamp,
            message: msg.message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorsBody {
    pub errors: Vec<String>,
}
