use crate::api::dto::{EmptyResponse, RegisterRequest, RegisterResponse, UnregisterRequest};
use crate::api::{ApiError, ApiTags};
use crate::auth::{authenticate_bearer, WorkerBearer};
use crate::bootstrap::Services;
use crate::registry::RegisterOutcome;
use krepro_common::recorded_http_api_request;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;
use tracing::Instrument;

type Result<T> = std::result::Result<T, ApiError>;

pub struct WorkersApi {
    pub services: Services,
}

#[OpenApi(prefix_path = "/api/v1/workers", tag = ApiTags::Workers)]
impl WorkersApi {
    /// Register (or re-register) a worker.
    ///
    /// First registration mints a fresh 128-bit secret and returns it in
    /// plaintext exactly once; every later call must submit that secret
    /// (SPEC_FULL.md §4.2, §8 invariant).
    #[oai(path = "/register", method = "post", operation_id = "register_worker")]
    async fn register(&self, body: Json<RegisterRequest>) -> Result<Json<RegisterResponse>> {
        let record = recorded_http_api_request!("register_worker", worker_id = body.0.worker_id);
        let response = self
            .register_internal(body.0)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn register_internal(&self, body: RegisterRequest) -> Result<Json<RegisterResponse>> {
        let outcome = self
            .services
            .registry
            .register(&body.worker_id, &body.hostname, body.secret.as_deref())
            .await?;

        let secret = match outcome {
            RegisterOutcome::Created { secret } => Some(secret),
            RegisterOutcome::Confirmed => None,
        };

        Ok(Json(RegisterResponse {
            worker_id: body.worker_id,
            secret,
        }))
    }

    #[oai(path = "/unregister", method = "post", operation_id = "unregister_worker")]
    async fn unregister(&self, body: Json<UnregisterRequest>) -> Result<Json<EmptyResponse>> {
        let record = recorded_http_api_request!("unregister_worker", worker_id = body.0.worker_id);
        let response = self
            .unregister_internal(body.0)
            .instrument(record.span.clone())
            .await;
        record.result(response)
    }

    async fn unregister_internal(&self, body: UnregisterRequest) -> Result<Json<EmptyResponse>> {
        self.services.registry.unregister(&body.worker_id, &body.secret).await?;
        Ok(Json(EmptyResponse::default()))
    }

    /// Heartbeat. Worker-authenticated; a worker that has fallen out of the
    /// liveness map gets a 403 here, prompting it to re-register.
    #[oai(path = "/ping", method = "post", operation_id = "ping_worker")]
    async fn ping(&self, token: WorkerBearer) -> Result<Json<EmptyResponse>> {
        let record = recorded_http_api_request!("ping_worker");
        let response = self.ping_internal(token).instrument(record.span.clone()).await;
        record.result(response)
    }

    async fn ping_internal(&self, token: WorkerBearer) -> Result<Json<EmptyResponse>> {
        let identity = authenticate_bearer(&self.services, &token)
            .await
            .map_err(crate::api::auth_error)?;
        self.services.registry.ping(&identity.worker_id).await;
        Ok(Json(EmptyResponse::default()))
    }
}
