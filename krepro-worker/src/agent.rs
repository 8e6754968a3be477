use crate::config::WorkerAgentConfig;
use crate::http_client::{CoordinatorClient, HttpClientError};
use crate::logstream::LogStreamHandle;
use crate::pipeline::{self, PipelineError};
use crate::queue::Delivery;
use krepro_common::model::{Task, TaskId};
use std::collections::HashSet;
use std::io::Write;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Outcome of driving one delivery to its conclusion, deciding how it must
/// be acked (SPEC_FULL.md §4.5 step 9, §4.3 consumer contract): only a
/// delivery whose terminal status report the coordinator accepted is acked;
/// everything else - malformed envelopes, lost claim races, and shutdowns
/// mid-pipeline - nacks.
enum PipelineRunOutcome {
    Cancelled,
    Reported,
    ReportFailed,
}

/// Drives the consumer and heartbeat loops of one worker agent process
/// (SPEC_FULL.md §4.5). A single `Agent` instance is shared between both
/// loops behind an `Arc`; it owns no per-delivery mutable state beyond the
/// idempotency set, since the consumer loop itself only ever holds one
/// delivery at a time - the same structural guarantee the spec calls the
/// "local busy flag" (prefetch=1 plus a sequential consumer loop).
pub struct Agent {
    config: WorkerAgentConfig,
    client: CoordinatorClient,
    grpc_channel: Channel,
    worker_id: String,
    /// Task ids this process has already claimed or executed at least once;
    /// consulted to satisfy the idempotency rule in SPEC_FULL.md §4.3 - a
    /// duplicate delivery of a task id already seen is requeued, never
    /// re-executed.
    seen: Mutex<HashSet<Uuid>>,
}

impl Agent {
    pub fn new(config: WorkerAgentConfig, client: CoordinatorClient, grpc_channel: Channel, worker_id: String) -> Self {
        Agent {
            config,
            client,
            grpc_channel,
            worker_id,
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Sends a heartbeat every `heartbeat_interval` until cancelled. A single
    /// failed ping is only logged, never retried immediately (SPEC_FULL.md
    /// §4.5) - if the coordinator's sweeper evicts this worker, subsequent
    /// pings return 403 and the operator restarts the agent to re-register.
    pub async fn heartbeat_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        ticker.tick().await; // first tick fires immediately; skip it, we just registered

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {
                    if let Err(err) = self.client.ping().await {
                        warn!(%err, "heartbeat ping failed");
                    }
                }
            }
        }
    }

    /// Drains deliveries one at a time until the channel closes or `cancel`
    /// fires. Never pulls a second delivery while one is in flight, which is
    /// what makes the per-delivery "busy" check in SPEC_FULL.md §4.5 a
    /// structural property of this loop rather than separate state.
    pub async fn consumer_loop(&self, mut deliveries: mpsc::Receiver<Delivery>, cancel: CancellationToken) {
        loop {
            let delivery = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("shutdown requested, stopping consumer loop");
                    return;
                }
                delivery = deliveries.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => {
                        info!("queue delivery channel closed, stopping consumer loop");
                        return;
                    }
                },
            };

            if let Err(err) = self.handle_delivery(delivery, &cancel).await {
                error!(%err, "error handling delivery");
            }

            if cancel.is_cancelled() {
                info!("shutdown requested mid-delivery, exiting consumer loop");
                return;
            }
        }
    }

    async fn handle_delivery(&self, delivery: Delivery, cancel: &CancellationToken) -> anyhow::Result<()> {
        let task: Task = match serde_json::from_slice(&delivery.body) {
            Ok(task) => task,
            Err(err) => {
                warn!(%err, "malformed task envelope, dropping");
                delivery.nack(false).await?;
                return Ok(());
            }
        };

        if !self.seen.lock().unwrap().insert(task.id.0) {
            info!(task_id = %task.id, "task already claimed or run by this agent, requeueing without re-executing");
            delivery.nack(true).await?;
            return Ok(());
        }

        if let Err(err) = self.client.accept_task(task.id.0).await {
            match err {
                HttpClientError::Conflict => {
                    info!(task_id = %task.id, "another worker already accepted this task");
                    delivery.nack(false).await?;
                }
                HttpClientError::NotFound => {
                    warn!(task_id = %task.id, "task no longer exists, dropping");
                    delivery.nack(false).await?;
                }
                other => {
                    warn!(task_id = %task.id, %other, "accept call failed, requeueing for retry");
                    self.seen.lock().unwrap().remove(&task.id.0);
                    delivery.nack(true).await?;
                }
            }
            return Ok(());
        }

        info!(task_id = %task.id, "accepted task, starting pipeline");
        tokio::time::sleep(self.config.accept_settle_delay).await;

        match self.run_pipeline(&task, cancel).await {
            PipelineRunOutcome::Cancelled => delivery.nack(true).await?,
            PipelineRunOutcome::Reported => delivery.ack().await?,
            PipelineRunOutcome::ReportFailed => delivery.nack(true).await?,
        }
        Ok(())
    }

    async fn run_pipeline(&self, task: &Task, cancel: &CancellationToken) -> PipelineRunOutcome {
        let commit = task.kernel_source_commit().unwrap_or("unknown").to_string();

        let descriptor_file = match write_descriptor(&task.payload) {
            Ok(file) => file,
            Err(err) => {
                warn!(task_id = %task.id, %err, "failed to materialize crash descriptor");
                return self
                    .report_terminal(task.id, false, format!("failed to materialize crash descriptor: {err}"))
                    .await;
            }
        };

        let logs = LogStreamHandle::open(self.grpc_channel.clone(), self.worker_id.clone(), task.id.to_string());

        let outcome = pipeline::run(
            &self.config.pipeline.binary,
            &self.config.pipeline.working_dir,
            &commit,
            descriptor_file.path(),
            &self.worker_id,
            &task.id.to_string(),
            &logs,
            cancel,
        )
        .await;

        logs.finish().await;

        match outcome {
            Err(PipelineError::Cancelled) => PipelineRunOutcome::Cancelled,
            Err(err) => {
                warn!(task_id = %task.id, %err, "failed to run pipeline");
                self.report_terminal(task.id, false, err.to_string()).await
            }
            Ok(outcome) if outcome.success => {
                let artifact = pipeline::artifact_path(&self.config.pipeline.working_dir, &commit);
                match self.client.upload_artifact(task.id.0, &artifact).await {
                    Ok(()) => {
                        self.report_terminal(task.id, true, "task executed successfully".to_string())
                            .await
                    }
                    Err(err) => {
                        warn!(task_id = %task.id, %err, "artifact upload failed, downgrading to failed");
                        self.report_terminal(task.id, false, format!("artifact upload failed: {err}"))
                            .await
                    }
                }
            }
            Ok(outcome) => {
                self.report_terminal(task.id, false, format!("pipeline failed with {}", outcome.describe()))
                    .await
            }
        }
    }

    async fn report_terminal(&self, task_id: TaskId, success: bool, result: String) -> PipelineRunOutcome {
        let status = if success { "success" } else { "failed" };
        match self.client.update_task_status(task_id.0, status, &result).await {
            Ok(()) => PipelineRunOutcome::Reported,
            Err(err) => {
                error!(task_id = %task_id, %err, "failed to report terminal status, will requeue");
                PipelineRunOutcome::ReportFailed
            }
        }
    }
}

fn write_descriptor(payload: &serde_json::Value) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&serde_json::to_vec(payload)?)?;
    file.flush()?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn write_descriptor_round_trips_the_payload() {
        let payload = serde_json::json!({
            "crashes": [{ "kernel-source-commit": "deadbeef" }],
        });
        let file = write_descriptor(&payload).expect("should materialize the descriptor");

        let contents = std::fs::read(file.path()).expect("descriptor file should be readable");
        let reparsed: serde_json::Value = serde_json::from_slice(&contents).unwrap();
        assert_eq!(reparsed, payload);
    }

    #[test]
    fn duplicate_task_id_is_only_accepted_once_by_the_seen_set() {
        let seen: Mutex<HashSet<Uuid>> = Mutex::new(HashSet::new());
        let id = Uuid::new_v4();

        assert!(seen.lock().unwrap().insert(id), "first sighting must be accepted");
        assert!(!seen.lock().unwrap().insert(id), "duplicate delivery must be rejected");
    }
}
