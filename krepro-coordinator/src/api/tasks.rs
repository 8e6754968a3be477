use crate::api::dto::{
    task_type_from_wire, terminal_status_from_wire, AcceptTaskRequest, CreateTaskRequest, CreateTaskResponse,
    DeleteTaskResponse, TaskDto, UpdateTaskStatusRequest,
};
use crate::api::{ApiError, ApiTags};
use crate::auth::{authenticate_bearer, WorkerBearer};
use crate::bootstrap::Services;
use krepro_common::model::TaskId;
use krepro_common::recorded_http_api_request;
use poem_openapi::param::Path;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use tracing::Instrument;
use uuid::Uuid;

type Result<T> = std::result::Result<T, ApiError>;

pub struct TasksApi {
    pub services: Services,
}

#[OpenApi(prefix_path = "/api/v1/tasks", tag = ApiTags::Tasks)]
impl TasksApi {
    /// Create task
    ///
    /// Persists the task as `pending` and publishes its envelope to the
    /// queue. The row is not visible to workers as acceptable until the
    /// publish succeeds (SPEC_FULL.md §4.1); callers may safely retry on
    /// a 500 since the queue consumer side tolerates duplicate delivery.
    #[oai(path = "/", method = "post", operation_id = "create_task")]
    async fn create_task(&self, body: Json<CreateTaskRequest>) -> Result<CreateTaskResponse> {
        let record = recorded_http_api_request!("create_task");
        let response = self
            .create_task_internal(body.0)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn create_task_internal(&self, body: CreateTaskRequest) -> Result<CreateTaskResponse> {
        let task_type = task_type_from_wire(&body.task_type)
            .ok_or_else(|| ApiError::bad_request(format!("unknown task type: {}", body.task_type)))?;

        let task = self.services.task_service.create(task_type, body.payload).await?;
        Ok(CreateTaskResponse::Accepted(Json(task.into())))
    }

    /// List tasks, newest first.
    #[oai(path = "/", method = "get", operation_id = "list_tasks")]
    async fn list_tasks(&self) -> Result<Json<Vec<TaskDto>>> {
        let record = recorded_http_api_request!("list_tasks");
        let response = self.list_tasks_internal().instrument(record.span.clone()).await;
        record.result(response)
    }

    async fn list_tasks_internal(&self) -> Result<Json<Vec<TaskDto>>> {
        let tasks = self.services.task_service.list().await?;
        Ok(Json(tasks.into_iter().map(TaskDto::from).collect()))
    }

    #[oai(path = "/:id", method = "get", operation_id = "get_task")]
    async fn get_task(&self, id: Path<Uuid>) -> Result<Json<TaskDto>> {
        let record = recorded_http_api_request!("get_task", task_id = id.0);
        let response = self
            .get_task_internal(id.0)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn get_task_internal(&self, id: Uuid) -> Result<Json<TaskDto>> {
        let task = self.services.task_service.get(TaskId(id)).await?;
        Ok(Json(task.into()))
    }

    #[oai(path = "/:id", method = "delete", operation_id = "delete_task")]
    async fn delete_task(&self, id: Path<Uuid>) -> Result<DeleteTaskResponse> {
        let record = recorded_http_api_request!("delete_task", task_id = id.0);
        let response = self
            .delete_task_internal(id.0)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn delete_task_internal(&self, id: Uuid) -> Result<DeleteTaskResponse> {
        self.services.task_service.delete(TaskId(id)).await?;
        Ok(DeleteTaskResponse::Deleted)
    }

    /// Accept (claim) a task
    ///
    /// Worker-authenticated. Exactly one concurrent caller for the same
    /// task id succeeds; the rest observe a 409 (SPEC_FULL.md §4.1, §8
    /// scenario 2).
    #[oai(path = "/accept", method = "post", operation_id = "accept_task")]
    async fn accept_task(
        &self,
        body: Json<AcceptTaskRequest>,
        token: WorkerBearer,
    ) -> Result<Json<TaskDto>> {
        let record = recorded_http_api_request!("accept_task", task_id = body.0.task_id);
        let response = self
            .accept_task_internal(body.0, token)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn accept_task_internal(
        &self,
        body: AcceptTaskRequest,
        token: WorkerBearer,
    ) -> Result<Json<TaskDto>> {
        let identity = authenticate_bearer(&self.services, &token)
            .await
            .map_err(crate::api::auth_error)?;
        let task = self
            .services
            .task_service
            .accept(TaskId(body.task_id), &identity.worker_id)
            .await?;
        Ok(Json(task.into()))
    }

    /// Report terminal status
    ///
    /// Worker-authenticated; the spec's open question on whether ownership
    /// is checked here is resolved in favor of checking it (SPEC_FULL.md
    /// §9) - only the worker that currently owns the task may patch it.
    #[oai(path = "/:id", method = "patch", operation_id = "update_task_status")]
    async fn update_task_status(
        &self,
        id: Path<Uuid>,
        body: Json<UpdateTaskStatusRequest>,
        token: WorkerBearer,
    ) -> Result<Json<TaskDto>> {
        let record = recorded_http_api_request!("update_task_status", task_id = id.0);
        let response = self
            .update_task_status_internal(id.0, body.0, token)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn update_task_status_internal(
        &self,
        id: Uuid,
        body: UpdateTaskStatusRequest,
        token: WorkerBearer,
    ) -> Result<Json<TaskDto>> {
        let identity = authenticate_bearer(&self.services, &token)
            .await
            .map_err(crate::api::auth_error)?;
        let status = terminal_status_from_wire(&body.status)
            .ok_or_else(|| ApiError::bad_request(format!("not a terminal status: {}", body.status)))?;

        let task = self
            .services
            .task_service
            .update_status(TaskId(id), &identity.worker_id, status, body.result)
            .await?;
        Ok(Json(task.into()))
    }
}
