use krepro_common::config::QueueConfig;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// One delivery pulled off the task queue, carrying enough state to ack or
/// nack it directly against the channel it arrived on (SPEC_FULL.md §4.3,
/// §4.5). Mirrors the `Delivery` wrapper in the original
/// `worker/internal/manage/rabbitmq.go`.
pub struct Delivery {
    pub body: Vec<u8>,
    tag: lapin::acker::Acker,
}

impl Delivery {
    pub async fn ack(&self) -> Result<(), lapin::Error> {
        self.tag.ack(BasicAckOptions::default()).await
    }

    pub async fn nack(&self, requeue: bool) -> Result<(), lapin::Error> {
        self.tag
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await
    }
}

/// Persistent single-prefetch consumer with auto-reconnect and exponential
/// backoff (SPEC_FULL.md §4.3). Deliveries are forwarded onto an internal
/// channel; the consumer loop in [`crate::agent`] drains that channel rather
/// than talking to lapin directly, so a mid-stream reconnect is invisible to
/// task-handling logic beyond an ordinary channel read.
pub struct QueueConsumer {
    config: QueueConfig,
}

impl QueueConsumer {
    /// Spawns the background connect-and-forward loop and returns the
    /// receiving half of its delivery channel. The loop runs until the
    /// returned receiver is dropped.
    pub fn connect(config: QueueConfig) -> mpsc::Receiver<Delivery> {
        let (tx, rx) = mpsc::channel(1);
        let consumer = QueueConsumer { config };
        tokio::spawn(consumer.run(tx));
        rx
    }

    async fn run(self, tx: mpsc::Sender<Delivery>) {
        let mut backoff = self.config.reconnect_initial_backoff;
        loop {
            match self.consume_until_closed(&tx).await {
                Ok(()) => {
                    info!("queue consumer channel closed, reconnecting");
                    backoff = self.config.reconnect_initial_backoff;
                }
                Err(err) => {
                    error!(%err, ?backoff, "failed to consume from queue, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, self.config.reconnect_max_backoff);
                    continue;
                }
            }
            if tx.is_closed() {
                return;
            }
        }
    }

    async fn consume_until_closed(&self, tx: &mpsc::Sender<Delivery>) -> Result<(), lapin::Error> {
        let channel = self.connect_channel().await?;

        let mut consumer = channel
            .basic_consume(
                &self.config.queue_name,
                "krepro-worker",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %self.config.queue_name, "queue consumer connected");

        use futures_util::StreamExt;
        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(err) => {
                    warn!(%err, "error reading next delivery, reconnecting");
                    return Err(err);
                }
            };

            let forwarded = Delivery {
                body: delivery.data,
                tag: delivery.acker,
            };

            if tx.send(forwarded).await.is_err() {
                return Ok(());
            }
        }

        Ok(())
    }

    async fn connect_channel(&self) -> Result<Channel, lapin::Error> {
        let conn = Connection::connect(
            &self.config.uri,
            ConnectionProperties::default()
                .with_executor(tokio_executor_trait::Tokio::current())
                .with_reactor(tokio_reactor_trait::Tokio),
        )
        .await?;

        let channel = conn.create_channel().await?;
        channel
            .queue_declare(
                &self.config.queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await?;

        Ok(channel)
    }
}
