use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Local identity document for this agent (SPEC_FULL.md §4.5), mirroring the
/// original `worker/internal/config/config.go` contract: `api_key` is the
/// plaintext secret, the only place it is ever persisted after the one-time
/// registration response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub worker_id: String,
    pub hostname: String,
    pub api_key: String,
    pub ip_address: String,
}

impl Identity {
    fn generate(hostname: String, ip_address: String) -> Self {
        Identity {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            hostname,
            api_key: String::new(),
            ip_address,
        }
    }

    pub fn has_secret(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Loads the identity document at `path`, or mints a fresh anonymous identity
/// (empty `api_key`) if none exists yet. Never writes to disk itself; callers
/// persist the confirmed identity via [`save_atomic`] once registration
/// succeeds.
pub fn load_or_generate(path: &Path, hostname: &str, advertised_ip: &str) -> anyhow::Result<Identity> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let identity: Identity = serde_json::from_slice(&bytes)?;
            info!(worker_id = %identity.worker_id, path = %path.display(), "loaded existing worker identity");
            Ok(identity)
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            let identity = Identity::generate(hostname.to_string(), advertised_ip.to_string());
            info!(worker_id = %identity.worker_id, "no identity file found, generated a fresh worker id");
            Ok(identity)
        }
        Err(err) => Err(err.into()),
    }
}

/// Writes `identity` to `path` via a temp file in the same directory followed
/// by a rename, so a crash mid-write never corrupts the previous identity
/// (SPEC_FULL.md §4.5).
pub fn save_atomic(path: &Path, identity: &Identity) -> anyhow::Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(identity)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    use std::io::Write;
    tmp.write_all(&json)?;
    tmp.flush()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn generates_a_fresh_identity_when_no_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");

        let identity = load_or_generate(&path, "build-host", "10.0.0.5").unwrap();
        assert!(identity.worker_id.starts_with("worker-"));
        assert!(!identity.has_secret());
    }

    #[test]
    fn round_trips_through_an_atomic_save() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.json");

        let mut identity = load_or_generate(&path, "build-host", "10.0.0.5").unwrap();
        identity.api_key = "deadbeefdeadbeef".to_string();
        save_atomic(&path, &identity).unwrap();

        let reloaded = load_or_generate(&path, "ignored", "ignored").unwrap();
        assert_eq!(reloaded.worker_id, identity.worker_id);
        assert_eq!(reloaded.api_key, "deadbeefdeadbeef");
        assert!(reloaded.has_secret());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("worker.json");

        let identity = Identity::generate("h".to_string(), "1.2.3.4".to_string());
        save_atomic(&path, &identity).unwrap();
        assert!(path.exists());
    }
}
