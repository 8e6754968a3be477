use crate::logstream::{LogSender, LogStreamHandle};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to spawn kernel-build pipeline: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("pipeline was cancelled before completion")]
    Cancelled,
    #[error("failed to wait on pipeline child: {0}")]
    Wait(#[source] std::io::Error),
}

pub struct PipelineOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl PipelineOutcome {
    pub fn describe(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Runs the opaque `kernel-build` child process for one task (SPEC_FULL.md
/// §4.5): the crash descriptor's source commit and the materialized
/// descriptor path are passed on the command line, stdout/stderr are
/// scanned line by line and streamed out over `logs`, and the child's exit
/// status is the sole success/failure signal - its stdout is never
/// inspected for that purpose. Grounded in `backend/pkg/compress/compress.go`'s
/// build-then-compress convention and `worker/cmd/worker.go`'s command
/// invocation (`kernel-builder -t <type> -f <descriptor> ...`).
pub async fn run(
    binary: &Path,
    working_dir: &Path,
    commit: &str,
    descriptor_path: &Path,
    client_id: &str,
    task_id: &str,
    logs: &LogStreamHandle,
    cancel: &CancellationToken,
) -> Result<PipelineOutcome, PipelineError> {
    let mut child = Command::new(binary)
        .arg(commit)
        .arg(descriptor_path)
        .current_dir(working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(PipelineError::Spawn)?;

    let stdout = child.stdout.take().expect("stdout was piped");
    let stderr = child.stderr.take().expect("stderr was piped");

    let stdout_task = scan_lines(stdout, client_id.to_string(), task_id.to_string(), logs.sender());
    let stderr_task = scan_lines(stderr, client_id.to_string(), task_id.to_string(), logs.sender());

    tokio::select! {
        _ = cancel.cancelled() => {
            warn!(task_id, "cancellation requested, killing pipeline child");
            let _ = kill(&mut child).await;
            Err(PipelineError::Cancelled)
        }
        status = wait_for_exit(child, stdout_task, stderr_task) => status,
    }
}

async fn kill(child: &mut Child) -> std::io::Result<()> {
    child.start_kill()
}

async fn wait_for_exit(
    mut child: Child,
    stdout_task: tokio::task::JoinHandle<()>,
    stderr_task: tokio::task::JoinHandle<()>,
) -> Result<PipelineOutcome, PipelineError> {
    let status = child.wait().await.map_err(PipelineError::Wait)?;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    info!(success = status.success(), code = ?status.code(), "pipeline child exited");
    Ok(PipelineOutcome {
        success: status.success(),
        exit_code: status.code(),
    })
}

fn scan_lines(
    reader: impl tokio::io::AsyncRead + Unpin + Send + 'static,
    client_id: String,
    task_id: String,
    logs: LogSender,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => logs.send_line(&client_id, &task_id, line).await,
                Ok(None) => break,
                Err(err) => {
                    warn!(task_id, %err, "error reading pipeline output");
                    break;
                }
            }
        }
    })
}

/// The conventional artifact path for a finished build (SPEC_FULL.md §4.5):
/// `build/<commit>/linux-<commit>.tar.zst`, resolved relative to the
/// pipeline's working directory.
pub fn artifact_path(working_dir: &Path, commit: &str) -> PathBuf {
    working_dir
        .join("build")
        .join(commit)
        .join(format!("linux-{commit}.tar.zst"))
}
