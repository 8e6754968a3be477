use chrono::Utc;
use krepro_common::logingest::log_ingest_client::LogIngestClient;
use krepro_common::logingest::LogMessage as WireLogMessage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Channel;
use tracing::warn;

/// Cheap, cloneable producer side of a log stream: stdout and stderr
/// scanning tasks each hold their own clone and send one `LogMessage` per
/// line (SPEC_FULL.md §4.5). The underlying RPC closes once every clone,
/// including the one kept by [`LogStreamHandle`], has been dropped.
#[derive(Clone)]
pub struct LogSender {
    tx: mpsc::Sender<WireLogMessage>,
}

impl LogSender {
    /// Sends one log line. Drops silently if the upload task has already
    /// exited (e.g. the coordinator closed the stream); the pipeline's own
    /// exit code remains the authoritative success signal (SPEC_FULL.md
    /// §4.5), log delivery is best-effort.
    pub async fn send_line(&self, client_id: &str, task_id: &str, line: String) {
        let message = WireLogMessage {
            client_id: client_id.to_string(),
            task_id: task_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            message: line,
        };
        let _ = self.tx.send(message).await;
    }
}

/// Owns a single client-streaming log upload RPC (SPEC_FULL.md §4.4, §4.5):
/// opened once per task, fed by [`LogSender`] clones handed to the
/// stdout/stderr line scanners, and driven to completion by a background
/// task whose handle [`finish`](Self::finish) waits on.
pub struct LogStreamHandle {
    sender: LogSender,
    upload: JoinHandle<()>,
}

impl LogStreamHandle {
    /// Opens the RPC and spawns the task that drives it to completion.
    /// `channel` is expected to be a lazily-connecting `tonic` channel so
    /// opening a handle never blocks on the coordinator being reachable.
    pub fn open(channel: Channel, client_id: String, task_id: String) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let mut client = LogIngestClient::new(channel);

        let upload = tokio::spawn(async move {
            let outbound = ReceiverStream::new(rx);
            match client.upload_logs(outbound).await {
                Ok(response) => {
                    let summary = response.into_inner();
                    if !summary.success {
                        warn!(client_id, task_id, message = %summary.message, "log ingest reported failure");
                    }
                }
                Err(status) => {
                    warn!(client_id, task_id, %status, "log ingest stream failed");
                }
            }
        });

        LogStreamHandle {
            sender: LogSender { tx },
            upload,
        }
    }

    /// A cloneable sender handed to each stdout/stderr scanning task.
    pub fn sender(&self) -> LogSender {
        self.sender.clone()
    }

    /// Drops this handle's own sender and waits for the upload task to
    /// observe stream EOF and report the server's final summary. Any
    /// scanner-held clones must already have been dropped (i.e. the child
    /// process has exited) or this will hang waiting for EOF.
    pub async fn finish(self) {
        drop(self.sender);
        let _ = self.upload.await;
    }
}
