use krepro_worker::agent::Agent;
use krepro_worker::config::{make_config_loader, WorkerAgentConfig};
use krepro_worker::http_client::CoordinatorClient;
use krepro_worker::identity;
use krepro_worker::queue::QueueConsumer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    let config: WorkerAgentConfig = make_config_loader().load()?;
    config.tracing.init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

/// Boots one worker agent process (SPEC_FULL.md §4.5): load or mint a local
/// identity, register with the coordinator, install the standing bearer
/// header, then run the consumer and heartbeat loops side by side until a
/// shutdown signal arrives.
async fn async_main(config: WorkerAgentConfig) -> anyhow::Result<()> {
    let hostname = local_hostname();
    let mut identity = identity::load_or_generate(&config.identity.path, &hostname, &config.identity.advertised_ip)?;

    let unauthenticated = CoordinatorClient::unauthenticated(
        config.coordinator_http_url.clone(),
        config.control_call_timeout,
    )?;

    let secret_to_send = if identity.has_secret() {
        Some(identity.api_key.as_str())
    } else {
        None
    };
    let registration = unauthenticated
        .register(&identity.worker_id, &identity.hostname, secret_to_send)
        .await?;

    identity.worker_id = registration.worker_id;
    if let Some(secret) = registration.secret {
        identity.api_key = secret;
        identity::save_atomic(&config.identity.path, &identity)?;
        info!(worker_id = %identity.worker_id, "registered, persisted freshly minted secret");
    } else {
        info!(worker_id = %identity.worker_id, "re-registered with existing secret");
    }

    let client = CoordinatorClient::authenticated(
        config.coordinator_http_url.clone(),
        &identity.worker_id,
        &identity.api_key,
        config.control_call_timeout,
        config.artifact_upload_timeout,
    )?;

    let grpc_channel = tonic::transport::Endpoint::from_shared(config.coordinator_grpc_url.clone())?.connect_lazy();

    let deliveries = QueueConsumer::connect(config.queue.clone());

    let cancel = CancellationToken::new();
    let agent = Arc::new(Agent::new(config, client.clone(), grpc_channel, identity.worker_id.clone()));

    let heartbeat_agent = agent.clone();
    let heartbeat_cancel = cancel.clone();
    let heartbeat_handle = tokio::spawn(async move { heartbeat_agent.heartbeat_loop(heartbeat_cancel).await });

    let consumer_agent = agent.clone();
    let consumer_cancel = cancel.clone();
    let consumer_handle =
        tokio::spawn(async move { consumer_agent.consumer_loop(deliveries, consumer_cancel).await });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining in-flight work");
    cancel.cancel();

    let _ = consumer_handle.await;
    heartbeat_handle.abort();

    if let Err(err) = client.unregister(&identity.worker_id, &identity.api_key).await {
        error!(%err, "failed to unregister cleanly on shutdown");
    }

    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn local_hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "unknown-host".to_string())
}
