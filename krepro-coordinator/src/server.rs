use krepro_coordinator::config::{make_config_loader, CoordinatorConfig};
use krepro_coordinator::Coordinator;
use tokio::task::JoinSet;
use tracing::error;

fn main() -> anyhow::Result<()> {
    let config: CoordinatorConfig = make_config_loader().load()?;
    config.tracing.init();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(config))
}

async fn async_main(config: CoordinatorConfig) -> anyhow::Result<()> {
    let coordinator = Coordinator::new(config).await?;

    let mut join_set: JoinSet<anyhow::Result<()>> = JoinSet::new();
    coordinator.run(&mut join_set).await?;

    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(%err, "a coordinator listener task failed"),
            Err(err) => error!(%err, "a coordinator listener task panicked"),
        }
    }

    Ok(())
}
