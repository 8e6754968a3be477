use crate::api::dto::HealthcheckResponse;
use crate::api::ApiTags;
use poem_openapi::payload::Json;
use poem_openapi::OpenApi;

/// Process liveness probe. Not part of the distilled spec's HTTP table but
/// carried as ambient stack: every server binary in this codebase exposes
/// one (SPEC_FULL.md §10).
pub struct HealthApi;

#[OpenApi(prefix_path = "/api/v1", tag = ApiTags::HealthCheck)]
impl HealthApi {
    #[oai(path = "/health", method = "get", operation_id = "health")]
    async fn health(&self) -> Json<HealthcheckResponse> {
        Json(HealthcheckResponse {
            status: "ok".to_string(),
        })
    }
}
