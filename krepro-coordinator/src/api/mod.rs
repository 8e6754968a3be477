use crate::bootstrap::Services;
use crate::config::CoordinatorConfig;
use crate::registry::RegistryError;
use crate::service::TaskServiceError;
use krepro_common::model::{ErrorBody, ErrorsBody};
use krepro_common::tracing_config::TraceErrorKind;
use poem_openapi::payload::Json;
use poem_openapi::{ApiResponse, OpenApiService, Tags};

pub mod artifacts;
pub mod dto;
pub mod health;
pub mod logs_grpc;
pub mod logs_ws;
pub mod tasks;
pub mod workers;

#[derive(Tags)]
pub enum ApiTags {
    Tasks,
    Workers,
    HealthCheck,
}

#[derive(ApiResponse, Debug, Clone)]
pub enum ApiError {
    #[oai(status = 400)]
    BadRequest(Json<ErrorsBody>),
    #[oai(status = 401)]
    Unauthorized(Json<ErrorBody>),
    #[oai(status = 403)]
    Forbidden(Json<ErrorBody>),
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
    #[oai(status = 409)]
    Conflict(Json<ErrorBody>),
    #[oai(status = 500)]
    InternalError(Json<ErrorBody>),
}

impl ApiError {
    pub fn bad_request(error: impl Into<String>) -> Self {
        ApiError::BadRequest(Json(ErrorsBody {
            errors: vec![error.into()],
        }))
    }
}

impl TraceErrorKind for ApiError {
    fn trace_error_kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::Unauthorized(_) => "Unauthorized",
            ApiError::Forbidden(_) => "Forbidden",
            ApiError::NotFound(_) => "NotFound",
            ApiError::Conflict(_) => "Conflict",
            ApiError::InternalError(_) => "InternalError",
        }
    }

    fn is_expected(&self) -> bool {
        !matches!(self, ApiError::InternalError(_))
    }
}

impl From<TaskServiceError> for ApiError {
    fn from(value: TaskServiceError) -> Self {
        match &value {
            TaskServiceError::NotFound(_) => ApiError::NotFound(Json(ErrorBody {
                error: value.to_string(),
            })),
            TaskServiceError::AlreadyClaimed(_) => ApiError::Conflict(Json(ErrorBody {
                error: format!("task already accepted: {value}"),
            })),
            TaskServiceError::AlreadyTerminal(_) => ApiError::Conflict(Json(ErrorBody {
                error: value.to_string(),
            })),
            TaskServiceError::NotOwner { .. } => ApiError::Forbidden(Json(ErrorBody {
                error: value.to_string(),
            })),
            TaskServiceError::PublishFailed(_) | TaskServiceError::Repo(_) => {
                ApiError::InternalError(Json(ErrorBody {
                    error: value.to_string(),
                }))
            }
        }
    }
}

/// Bridges the raw `poem::Error` produced by [`crate::auth::authenticate`]
/// (which also backs the non-OpenAPI websocket route) into this API's typed
/// error, used by every OpenAPI handler that authenticates a worker bearer.
pub(crate) fn auth_error(err: poem::Error) -> ApiError {
    let status = err.status();
    let body = ErrorBody {
        error: err.to_string(),
    };
    match status {
        http::StatusCode::FORBIDDEN => ApiError::Forbidden(Json(body)),
        _ => ApiError::Unauthorized(Json(body)),
    }
}

impl From<RegistryError> for ApiError {
    fn from(value: RegistryError) -> Self {
        match &value {
            RegistryError::InvalidSecret(_) | RegistryError::SecretRequired => {
                ApiError::Unauthorized(Json(ErrorBody {
                    error: value.to_string(),
                }))
            }
            RegistryError::Repo(_) => ApiError::InternalError(Json(ErrorBody {
                error: value.to_string(),
            })),
        }
    }
}

pub type Apis = (
    tasks::TasksApi,
    workers::WorkersApi,
    health::HealthApi,
);

pub fn make_open_api_service(services: &Services, config: &CoordinatorConfig) -> OpenApiService<Apis, ()> {
    let server_url = format!("http://localhost:{}", config.http_port);
    OpenApiService::new(
        (
            tasks::TasksApi {
                services: services.clone(),
            },
            workers::WorkersApi {
                services: services.clone(),
            },
            health::HealthApi,
        ),
        "krepro-coordinator",
        env!("CARGO_PKG_VERSION"),
    )
    .server(server_url)
}
