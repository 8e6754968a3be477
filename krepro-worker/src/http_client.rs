use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::io::ReaderStream;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("io error reading artifact for upload: {0}")]
    Io(#[from] std::io::Error),
    #[error("coordinator rejected the request (401 unauthorized)")]
    Unauthorized,
    #[error("worker is not currently online (403 forbidden)")]
    Forbidden,
    #[error("task is already claimed by another worker (409 conflict)")]
    Conflict,
    #[error("task not found (404)")]
    NotFound,
    #[error("unexpected response status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequestWire<'a> {
    worker_id: &'a str,
    hostname: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponseWire {
    pub worker_id: String,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnregisterRequestWire<'a> {
    worker_id: &'a str,
    secret: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptTaskRequestWire {
    task_id: Uuid,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateTaskStatusRequestWire<'a> {
    status: &'a str,
    result: &'a str,
}

/// Thin HTTP client over the coordinator's REST surface (SPEC_FULL.md §6),
/// mirroring this codebase's convention of a small hand-rolled client
/// instead of a generated one, since the worker is the only caller. Built
/// once unauthenticated for the one-time registration call, then rebuilt
/// with a standing `Authorization` header for everything after (SPEC_FULL.md
/// §4.5 step 3).
#[derive(Clone)]
pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    upload_timeout: Duration,
}

impl CoordinatorClient {
    pub fn unauthenticated(base_url: String, control_call_timeout: Duration) -> Result<Self, HttpClientError> {
        let http = reqwest::Client::builder().timeout(control_call_timeout).build()?;
        Ok(CoordinatorClient {
            http,
            base_url,
            upload_timeout: control_call_timeout,
        })
    }

    pub fn authenticated(
        base_url: String,
        worker_id: &str,
        secret: &str,
        control_call_timeout: Duration,
        upload_timeout: Duration,
    ) -> Result<Self, HttpClientError> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(&format!("Bearer {worker_id}:{secret}"))
            .expect("worker id and secret never contain control characters");
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(control_call_timeout)
            .build()?;

        Ok(CoordinatorClient {
            http,
            base_url,
            upload_timeout,
        })
    }

    pub async fn register(
        &self,
        worker_id: &str,
        hostname: &str,
        secret: Option<&str>,
    ) -> Result<RegisterResponseWire, HttpClientError> {
        let response = self
            .http
            .post(format!("{}/api/v1/workers/register", self.base_url))
            .json(&RegisterRequestWire {
                worker_id,
                hostname,
                secret,
            })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED => Err(HttpClientError::Unauthorized),
            status => Err(unexpected(status, response).await),
        }
    }

    pub async fn unregister(&self, worker_id: &str, secret: &str) -> Result<(), HttpClientError> {
        let response = self
            .http
            .post(format!("{}/api/v1/workers/unregister", self.base_url))
            .json(&UnregisterRequestWire { worker_id, secret })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::UNAUTHORIZED => Err(HttpClientError::Unauthorized),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Heartbeat; relies on the standing auth header installed at construction.
    pub async fn ping(&self) -> Result<(), HttpClientError> {
        let response = self
            .http
            .post(format!("{}/api/v1/workers/ping", self.base_url))
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::FORBIDDEN => Err(HttpClientError::Forbidden),
            status => Err(unexpected(status, response).await),
        }
    }

    pub async fn accept_task(&self, task_id: Uuid) -> Result<(), HttpClientError> {
        let response = self
            .http
            .post(format!("{}/api/v1/tasks/accept", self.base_url))
            .json(&AcceptTaskRequestWire { task_id })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::CONFLICT => Err(HttpClientError::Conflict),
            StatusCode::NOT_FOUND => Err(HttpClientError::NotFound),
            status => Err(unexpected(status, response).await),
        }
    }

    pub async fn update_task_status(&self, task_id: Uuid, status: &str, result: &str) -> Result<(), HttpClientError> {
        let response = self
            .http
            .patch(format!("{}/api/v1/tasks/{task_id}", self.base_url))
            .json(&UpdateTaskStatusRequestWire { status, result })
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(HttpClientError::NotFound),
            status => Err(unexpected(status, response).await),
        }
    }

    /// Streams `path`'s contents rather than reading the whole artifact into
    /// memory first; kernel build artifacts can be multiple gigabytes
    /// (SPEC_FULL.md §4.5, §9). Uses the long upload deadline, distinct from
    /// the short control-call timeout used everywhere else.
    pub async fn upload_artifact(&self, task_id: Uuid, path: &Path) -> Result<(), HttpClientError> {
        let file = tokio::fs::File::open(path).await?;
        let file_name = path
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string());

        let stream = ReaderStream::new(file);
        let part = reqwest::multipart::Part::stream(reqwest::Body::wrap_stream(stream)).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .http
            .post(format!("{}/api/v1/tasks/{task_id}/artifact", self.base_url))
            .timeout(self.upload_timeout)
            .multipart(form)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(HttpClientError::NotFound),
            status => Err(unexpected(status, response).await),
        }
    }
}

async fn unexpected(status: StatusCode, response: reqwest::Response) -> HttpClientError {
    let body = response.text().await.unwrap_or_default();
    HttpClientError::UnexpectedStatus { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn authenticated_client_builds_without_panicking() {
        let client = CoordinatorClient::authenticated(
            "http://localhost:8080".to_string(),
            "worker-a",
            "deadbeef",
            Duration::from_secs(5),
            Duration::from_secs(600),
        );
        assert!(client.is_ok());
    }
}
