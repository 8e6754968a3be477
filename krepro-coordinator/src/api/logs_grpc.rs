use crate::loghub::LogHub;
use crate::logingest::log_ingest_server::LogIngest;
use crate::logingest::{LogMessage as WireLogMessage, UploadSummary};
use chrono::{DateTime, Utc};
use krepro_common::model::{LogEnvelope, TaskId};
use tonic::{Request, Response, Status, Streaming};
use tracing::warn;
use uuid::Uuid;

/// Implements the generated `LogIngest` gRPC service, fed by worker agents
/// streaming a running task's child-process stdout/stderr lines
/// (SPEC_FULL.md §4.3). Every parsed line is handed straight to the
/// [`LogHub`] for fan-out to websocket subscribers; nothing is persisted.
pub struct LogIngestService {
    log_hub: LogHub,
}

impl LogIngestService {
    pub fn new(log_hub: LogHub) -> Self {
        LogIngestService { log_hub }
    }
}

#[tonic::async_trait]
impl LogIngest for LogIngestService {
    async fn upload_logs(
        &self,
        request: Request<Streaming<WireLogMessage>>,
    ) -> Result<Response<UploadSummary>, Status> {
        let mut stream = request.into_inner();
        let mut accepted = 0u64;

        loop {
            let message = match stream.message().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(err) => {
                    warn!(%err, "log ingest stream error");
                    return Ok(Response::new(UploadSummary {
                        success: false,
                        message: format!("stream error after {accepted} messages: {err}"),
                    }));
                }
            };

            match parse_envelope(message) {
                Ok(envelope) => {
                    self.log_hub.broadcast(envelope);
                    accepted += 1;
                }
                Err(reason) => {
                    warn!(reason, "dropping malformed log message");
                }
            }
        }

        Ok(Response::new(UploadSummary {
            success: true,
            message: format!("accepted {accepted} messages"),
        }))
    }
}

fn parse_envelope(message: WireLogMessage) -> Result<LogEnvelope, &'static str> {
    let task_id = message.task_id.parse::<Uuid>().map_err(|_| "invalid task_id")?;
    let time = message
        .timestamp
        .parse::<DateTime<Utc>>()
        .map_err(|_| "invalid timestamp")?;

    Ok(LogEnvelope {
        task_id: TaskId(task_id),
        time,
        message: message.message,
    })
}
