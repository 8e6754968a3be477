use crate::config::{ArtifactConfig, CoordinatorConfig};
use crate::credential::CredentialStore;
use crate::loghub::LogHub;
use crate::queue::Publisher;
use crate::registry::WorkerRegistry;
use crate::repo::{DbTaskRepo, DbWorkerRepo};
use crate::service::{TaskService, TaskServiceDefault};
use sqlx::PgPool;
use std::sync::Arc;

/// Composition root: owns every shared collaborator behind an `Arc` and is
/// cheap to clone into request-handler state (SPEC_FULL.md §10, mirroring
/// this codebase's usual `Services` wiring pattern).
#[derive(Clone)]
pub struct Services {
    pub task_service: Arc<dyn TaskService>,
    pub registry: Arc<WorkerRegistry>,
    pub publisher: Arc<Publisher>,
    pub log_hub: LogHub,
    pub credentials: CredentialStore,
    pub artifacts: ArtifactConfig,
}

impl Services {
    pub async fn new(config: &CoordinatorConfig, pool: PgPool) -> anyhow::Result<Self> {
        let task_repo = Arc::new(DbTaskRepo::new(pool.clone()));
        let worker_repo = Arc::new(DbWorkerRepo::new(pool));
        let registry = Arc::new(WorkerRegistry::new(worker_repo, config.registry.clone()));
        let publisher = Publisher::connect(config.queue.clone());
        let log_hub = LogHub::spawn();
        let task_service: Arc<dyn TaskService> =
            Arc::new(TaskServiceDefault::new(task_repo, publisher.clone()));

        tokio::spawn(registry.clone().run_sweeper());

        Ok(Services {
            task_service,
            registry,
            publisher,
            log_hub,
            credentials: CredentialStore,
            artifacts: config.artifacts.clone(),
        })
    }
}
