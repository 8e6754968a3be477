use chrono::{DateTime, Utc};
use krepro_common::model::{Task, TaskStatus, TaskType};
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, Object};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maps the domain enum onto the wire strings used throughout the HTTP
/// and queue surfaces (kept distinct from `krepro_common`'s own serde
/// representation so the OpenAPI schema doesn't need a `poem_openapi`
/// dependency threaded through the shared model crate).
pub fn task_type_to_wire(task_type: &TaskType) -> &'static str {
    match task_type {
        TaskType::KernelBuild => "kernel-build",
        TaskType::PatchApply => "patch-apply",
    }
}

pub fn task_type_from_wire(s: &str) -> Option<TaskType> {
    match s {
        "kernel-build" => Some(TaskType::KernelBuild),
        "patch-apply" => Some(TaskType::PatchApply),
        _ => None,
    }
}

pub fn task_status_to_wire(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Running => "running",
        TaskStatus::Success => "success",
        TaskStatus::Failed => "failed",
    }
}

pub fn terminal_status_from_wire(s: &str) -> Option<TaskStatus> {
    match s {
        "success" => Some(TaskStatus::Success),
        "failed" => Some(TaskStatus::Failed),
        _ => None,
    }
}

/// Wire representation of a [`Task`]; mirrors the durable row exactly
/// (SPEC_FULL.md §3), including the fields that are only ever non-null
/// once the task has passed a particular lifecycle gate.
#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct TaskDto {
    pub id: Uuid,
    #[oai(rename = "type")]
    pub task_type: String,
    pub status: String,
    pub payload: serde_json::Value,
    pub worker_id: String,
    pub result: Option<String>,
    pub artifact_path: Option<String>,
    pub artifact_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskDto {
    fn from(task: Task) -> Self {
        TaskDto {
            id: task.id.0,
            task_type: task_type_to_wire(&task.task_type).to_string(),
            status: task_status_to_wire(task.status).to_string(),
            payload: task.payload,
            worker_id: task.worker_id,
            result: task.result,
            artifact_path: task.artifact_path,
            artifact_name: task.artifact_name,
            created_at: task.created_at,
            started_at: task.started_at,
            finished_at: task.finished_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[oai(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct UpdateTaskStatusRequest {
    pub status: String,
    pub result: String,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct AcceptTaskRequest {
    pub task_id: Uuid,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub worker_id: String,
    pub hostname: String,
    /// Required on every call after the first; omitted on first registration.
    pub secret: Option<String>,
}

/// The plaintext secret is present only on the call that first creates the
/// worker row (SPEC_FULL.md §4.2); every re-registration response omits it.
#[derive(Debug, Clone, Serialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub worker_id: String,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Object)]
#[oai(rename_all = "camelCase")]
pub struct UnregisterRequest {
    pub worker_id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Object)]
pub struct HealthcheckResponse {
    pub status: String,
}

/// Empty 200 body for endpoints whose success carries no payload.
#[derive(Debug, Clone, Default, Serialize, Object)]
pub struct EmptyResponse {}

/// A freshly created task is accepted, not yet synchronously complete in
/// the sense the body implies (SPEC_FULL.md §6: `POST /tasks … 202`).
#[derive(ApiResponse)]
pub enum CreateTaskResponse {
    #[oai(status = 202)]
    Accepted(Json<TaskDto>),
}

/// `DELETE /tasks/:id` carries no body (SPEC_FULL.md §6: `… 204`).
#[derive(ApiResponse)]
pub enum DeleteTaskResponse {
    #[oai(status = 204)]
    Deleted,
}
