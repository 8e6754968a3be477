use crate::bootstrap::Services;
use crate::loghub::LogHub;
use futures_util::{SinkExt, StreamExt};
use poem::web::websocket::{Message, WebSocket, WebSocketStream};
use poem::web::Data;
use poem::{handler, IntoResponse, Response};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Server keepalive ping cadence (SPEC_FULL.md §4.4).
const PING_PERIOD: Duration = Duration::from_secs(54);
/// How long we tolerate silence from the client before dropping it.
const PONG_WAIT: Duration = Duration::from_secs(60);
/// Deadline for a single frame write.
const WRITE_WAIT: Duration = Duration::from_secs(10);
/// Inbound frames larger than this are treated as a protocol violation;
/// clients never need to send more than a pong.
const READ_SIZE_CAP: usize = 2 * 1024;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

/// `GET /api/v1/logs/ws`. Raw `poem` handler (not an `#[OpenApi]` method,
/// mirroring how this codebase's own worker-log proxy is a plain
/// `#[handler]` upgrade rather than an OpenAPI-declared route) that
/// registers one [`LogHub`] subscriber per connection and runs its
/// write/read pumps until either side disconnects.
#[handler]
pub fn logs_ws(websocket: WebSocket, Data(services): Data<&Services>) -> Response {
    let log_hub = services.log_hub.clone();
    websocket
        .on_upgrade(move |socket| async move {
            serve_subscriber(log_hub, socket).await;
        })
        .into_response()
}

async fn serve_subscriber(log_hub: LogHub, socket: WebSocketStream) {
    let id = NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed);
    let mut receiver = log_hub.register(id).await;
    let (mut sink, mut stream) = socket.split();

    let mut ping_interval = tokio::time::interval(PING_PERIOD);
    ping_interval.tick().await;

    let read_deadline = tokio::time::sleep(PONG_WAIT);
    tokio::pin!(read_deadline);

    loop {
        tokio::select! {
            _ = &mut read_deadline => {
                info!(subscriber_id = id, "pong wait elapsed, closing subscriber");
                break;
            }
            _ = ping_interval.tick() => {
                if tokio::time::timeout(WRITE_WAIT, sink.send(Message::Ping(Vec::new()))).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Pong(_))) => {
                        read_deadline.as_mut().reset(Instant::now() + PONG_WAIT);
                    }
                    Some(Ok(message)) => {
                        if message_size(&message) > READ_SIZE_CAP {
                            info!(subscriber_id = id, "client frame exceeded read cap, closing");
                            break;
                        }
                        read_deadline.as_mut().reset(Instant::now() + PONG_WAIT);
                    }
                    Some(Err(_)) => break,
                }
            }
            envelope = receiver.recv() => {
                match envelope {
                    Some(envelope) => {
                        let text = serde_json::to_string(&envelope).expect("LogEnvelope always serializes");
                        if tokio::time::timeout(WRITE_WAIT, sink.send(Message::Text(text))).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    log_hub.unregister(id).await;
}

fn message_size(message: &Message) -> usize {
    match message {
        Message::Text(text) => text.len(),
        Message::Binary(bytes) => bytes.len(),
        Message::Ping(bytes) | Message::Pong(bytes) => bytes.len(),
        Message::Close(_) => 0,
    }
}
