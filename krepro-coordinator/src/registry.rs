use crate::config::RegistryConfig;
use crate::credential::CredentialStore;
use crate::repo::{WorkerRepo, WorkerRepoError};
use chrono::Utc;
use krepro_common::model::Worker;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid secret for worker {0}")]
    InvalidSecret(String),
    #[error("secret required to re-register an existing worker")]
    SecretRequired,
    #[error(transparent)]
    Repo(#[from] WorkerRepoError),
}

pub enum RegisterOutcome {
    /// First registration: the plaintext secret, returned exactly once.
    Created { secret: String },
    /// Re-registration of a known worker whose submitted secret matched.
    Confirmed,
}

/// Distinguishes a bad credential from a credential that is merely stale
/// (SPEC_FULL.md §6): callers use this to pick between 401 and 403.
#[derive(Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Worker unknown or secret mismatch.
    Unauthenticated,
    /// Secret matched a known worker but it has no live heartbeat.
    Offline,
    Authenticated,
}

struct LiveEntry {
    last_seen: Instant,
}

/// Durable `workers` table plus an in-memory liveness map kept eventually
/// consistent by a periodic sweeper (SPEC_FULL.md §4.2). The in-memory map is
/// the source of truth for liveness; the durable row is the source of truth
/// for identity and secret.
pub struct WorkerRegistry {
    repo: Arc<dyn WorkerRepo>,
    credentials: CredentialStore,
    live: RwLock<HashMap<String, LiveEntry>>,
    config: RegistryConfig,
}

impl WorkerRegistry {
    pub fn new(repo: Arc<dyn WorkerRepo>, config: RegistryConfig) -> Self {
        WorkerRegistry {
            repo,
            credentials: CredentialStore,
            live: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub async fn register(
        &self,
        worker_id: &str,
        hostname: &str,
        submitted_secret: Option<&str>,
    ) -> Result<RegisterOutcome, RegistryError> {
        let existing = self.repo.find(worker_id).await?;

        let outcome = match existing {
            None => {
                let secret = self.credentials.generate_secret();
                let hash = self
                    .credentials
                    .hash_secret(&secret)
                    .map_err(|_| RegistryError::InvalidSecret(worker_id.to_string()))?;
                self.repo
                    .insert(&Worker {
                        worker_id: worker_id.to_string(),
                        api_key_hash: hash,
                        hostname: hostname.to_string(),
                        status: krepro_common::model::WorkerStatus::Online,
                        last_seen: Utc::now(),
                    })
                    .await?;
                RegisterOutcome::Created { secret }
            }
            Some(worker) => {
                let secret = submitted_secret.ok_or(RegistryError::SecretRequired)?;
                self.credentials
                    .verify_secret(secret, &worker.api_key_hash)
                    .map_err(|_| RegistryError::InvalidSecret(worker_id.to_string()))?;
                self.repo
                    .mark_online(worker_id, hostname, Utc::now())
                    .await?;
                RegisterOutcome::Confirmed
            }
        };

        self.live.write().await.insert(
            worker_id.to_string(),
            LiveEntry {
                last_seen: Instant::now(),
            },
        );

        Ok(outcome)
    }

    pub async fn unregister(&self, worker_id: &str, submitted_secret: &str) -> Result<(), RegistryError> {
        let worker = self
            .repo
            .find(worker_id)
            .await?
            .ok_or_else(|| RegistryError::InvalidSecret(worker_id.to_string()))?;

        self.credentials
            .verify_secret(submitted_secret, &worker.api_key_hash)
            .map_err(|_| RegistryError::InvalidSecret(worker_id.to_string()))?;

        self.repo.mark_offline(worker_id).await?;
        self.live.write().await.remove(worker_id);
        Ok(())
    }

    /// Touches `last_seen` in the in-memory map. Returns `false` (forcing
    /// re-registration) if the worker has no live entry.
    pub async fn ping(&self, worker_id: &str) -> bool {
        let mut live = self.live.write().await;
        match live.get_mut(worker_id) {
            Some(entry) => {
                entry.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub async fn is_online(&self, worker_id: &str) -> bool {
        self.live.read().await.contains_key(worker_id)
    }

    /// Verifies a `worker_id`/secret pair carried by the bearer auth
    /// middleware. A worker that has fallen out of the liveness map (no
    /// heartbeat within the timeout, or never registered this process
    /// lifetime) authenticates as [`AuthOutcome::Offline`] even with a
    /// correct secret, since the coordinator has no live channel to it.
    pub async fn authenticate(&self, worker_id: &str, secret: &str) -> Result<AuthOutcome, RegistryError> {
        let Some(worker) = self.repo.find(worker_id).await? else {
            return Ok(AuthOutcome::Unauthenticated);
        };

        if self
            .credentials
            .verify_secret(secret, &worker.api_key_hash)
            .is_err()
        {
            return Ok(AuthOutcome::Unauthenticated);
        }

        if !self.is_online(worker_id).await {
            return Ok(AuthOutcome::Offline);
        }

        Ok(AuthOutcome::Authenticated)
    }

    /// Runs forever, evicting entries whose `last_seen` age exceeds the
    /// liveness timeout every `cleanup_interval`. Each eviction is followed by
    /// a best-effort asynchronous write flipping the durable row offline -
    /// failures are logged, never propagated, since the in-memory eviction is
    /// already authoritative for the auth middleware.
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.cleanup_interval);
        loop {
            interval.tick().await;
            self.sweep_once().await;
        }
    }

    async fn sweep_once(&self) {
        let timeout = self.config.liveness_timeout;
        let stale: Vec<String> = {
            let live = self.live.read().await;
            live.iter()
                .filter(|(_, entry)| entry.last_seen.elapsed() > timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        if stale.is_empty() {
            return;
        }

        let mut live = self.live.write().await;
        for worker_id in &stale {
            live.remove(worker_id);
        }
        drop(live);

        for worker_id in stale {
            match self.repo.mark_offline(&worker_id).await {
                Ok(()) => info!(worker_id, "evicted stale worker"),
                Err(err) => warn!(worker_id, %err, "failed to flip evicted worker offline"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use std::sync::Mutex;
    use test_r::test;

    #[derive(Default)]
    struct InMemoryWorkerRepo {
        workers: Mutex<HashMap<String, Worker>>,
    }

    #[async_trait]
    impl WorkerRepo for InMemoryWorkerRepo {
        async fn find(&self, worker_id: &str) -> Result<Option<Worker>, WorkerRepoError> {
            Ok(self.workers.lock().unwrap().get(worker_id).cloned())
        }

        async fn insert(&self, worker: &Worker) -> Result<(), WorkerRepoError> {
            self.workers
                .lock()
                .unwrap()
                .insert(worker.worker_id.clone(), worker.clone());
            Ok(())
        }

        async fn mark_online(
            &self,
            worker_id: &str,
            hostname: &str,
            last_seen: DateTime<Utc>,
        ) -> Result<(), WorkerRepoError> {
            let mut workers = self.workers.lock().unwrap();
            let worker = workers
                .get_mut(worker_id)
                .ok_or_else(|| WorkerRepoError::NotFound(worker_id.to_string()))?;
            worker.hostname = hostname.to_string();
            worker.last_seen = last_seen;
            worker.status = krepro_common::model::WorkerStatus::Online;
            Ok(())
        }

        async fn mark_offline(&self, worker_id: &str) -> Result<(), WorkerRepoError> {
            if let Some(worker) = self.workers.lock().unwrap().get_mut(worker_id) {
                worker.status = krepro_common::model::WorkerStatus::Offline;
            }
            Ok(())
        }
    }

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(InMemoryWorkerRepo::default()), RegistryConfig {
            cleanup_interval: std::time::Duration::from_millis(10),
            liveness_timeout: std::time::Duration::from_millis(20),
        })
    }

    #[test]
    async fn first_registration_returns_secret_exactly_once() {
        let registry = registry();
        let outcome = registry.register("w1", "host-a", None).await.unwrap();
        let secret = match outcome {
            RegisterOutcome::Created { secret } => secret,
            _ => panic!("expected Created"),
        };
        assert!(registry.is_online("w1").await);

        let outcome = registry.register("w1", "host-a", Some(&secret)).await.unwrap();
        assert!(matches!(outcome, RegisterOutcome::Confirmed));
    }

    #[test]
    async fn reregister_with_wrong_secret_is_rejected() {
        let registry = registry();
        registry.register("w1", "host-a", None).await.unwrap();
        let err = registry.register("w1", "host-a", Some("wrong")).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSecret(_)));
    }

    #[test]
    async fn unregister_round_trips_with_original_secret() {
        let registry = registry();
        let secret = match registry.register("w3", "host-c", None).await.unwrap() {
            RegisterOutcome::Created { secret } => secret,
            _ => unreachable!(),
        };

        registry.unregister("w3", "wrong").await.unwrap_err();
        registry.unregister("w3", &secret).await.unwrap();
        assert!(!registry.is_online("w3").await);

        registry.register("w3", "host-c", Some(&secret)).await.unwrap();
    }

    #[test]
    async fn sweeper_evicts_stale_entries() {
        let registry = Arc::new(registry());
        registry.register("w2", "host-b", None).await.unwrap();
        assert!(registry.is_online("w2").await);

        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        registry.sweep_once().await;

        assert!(!registry.is_online("w2").await);
    }

    #[test]
    async fn ping_on_unknown_worker_returns_false() {
        let registry = registry();
        assert!(!registry.ping("ghost").await);
    }

    #[test]
    async fn authenticate_distinguishes_unknown_offline_and_online() {
        let registry = registry();
        let secret = match registry.register("w4", "host-d", None).await.unwrap() {
            RegisterOutcome::Created { secret } => secret,
            _ => unreachable!(),
        };

        assert_eq!(
            registry.authenticate("w4", &secret).await.unwrap(),
            AuthOutcome::Authenticated
        );
        assert_eq!(
            registry.authenticate("w4", "wrong").await.unwrap(),
            AuthOutcome::Unauthenticated
        );
        assert_eq!(
            registry.authenticate("ghost", &secret).await.unwrap(),
            AuthOutcome::Unauthenticated
        );

        registry.live.write().await.remove("w4");
        assert_eq!(
            registry.authenticate("w4", &secret).await.unwrap(),
            AuthOutcome::Offline
        );
    }
}
