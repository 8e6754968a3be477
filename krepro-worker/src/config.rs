use krepro_common::config::{ConfigLoader, QueueConfig};
use krepro_common::tracing_config::TracingConfig;
use krepro_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerAgentConfig {
    pub tracing: TracingConfig,
    /// Base URL of the coordinator's HTTP surface, e.g. `http://localhost:8080`.
    pub coordinator_http_url: String,
    /// Address of the coordinator's gRPC log-ingest endpoint, e.g. `http://localhost:8081`.
    pub coordinator_grpc_url: String,
    pub queue: QueueConfig,
    pub identity: IdentityConfig,
    pub pipeline: PipelineConfig,
    #[serde(with = "humantime_serde")]
    pub heartbeat_interval: std::time::Duration,
    /// Mirrors the original agent's fixed pause between a successful `accept`
    /// and starting the pipeline (SPEC_FULL.md §4.5).
    #[serde(with = "humantime_serde")]
    pub accept_settle_delay: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub control_call_timeout: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub artifact_upload_timeout: std::time::Duration,
}

impl Default for WorkerAgentConfig {
    fn default() -> Self {
        WorkerAgentConfig {
            tracing: TracingConfig::local_dev("krepro-worker"),
            coordinator_http_url: "http://localhost:8080".to_string(),
            coordinator_grpc_url: "http://localhost:8081".to_string(),
            queue: QueueConfig::default(),
            identity: IdentityConfig::default(),
            pipeline: PipelineConfig::default(),
            heartbeat_interval: std::time::Duration::from_secs(60),
            accept_settle_delay: std::time::Duration::from_secs(2),
            control_call_timeout: std::time::Duration::from_secs(5),
            artifact_upload_timeout: std::time::Duration::from_secs(600),
        }
    }
}

impl SafeDisplay for WorkerAgentConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "coordinator HTTP url: {}", self.coordinator_http_url);
        let _ = writeln!(&mut result, "coordinator gRPC url: {}", self.coordinator_grpc_url);
        let _ = writeln!(&mut result, "queue:");
        let _ = writeln!(&mut result, "{}", self.queue.to_safe_string_indented());
        let _ = writeln!(&mut result, "identity:");
        let _ = writeln!(&mut result, "{}", self.identity.to_safe_string_indented());
        let _ = writeln!(&mut result, "pipeline:");
        let _ = writeln!(&mut result, "{}", self.pipeline.to_safe_string_indented());
        let _ = writeln!(&mut result, "heartbeat interval: {:?}", self.heartbeat_interval);
        let _ = writeln!(&mut result, "accept settle delay: {:?}", self.accept_settle_delay);
        let _ = writeln!(&mut result, "control call timeout: {:?}", self.control_call_timeout);
        let _ = writeln!(&mut result, "artifact upload timeout: {:?}", self.artifact_upload_timeout);
        result
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Path to the locally persisted worker identity document (SPEC_FULL.md §4.5).
    pub path: PathBuf,
    /// Advertised IP, recorded in the identity file only; never sent over the wire.
    pub advertised_ip: String,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            path: PathBuf::from("worker.json"),
            advertised_ip: "0.0.0.0".to_string(),
        }
    }
}

impl SafeDisplay for IdentityConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "path: {}\nadvertised ip: {}\n",
            self.path.display(),
            self.advertised_ip
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// The opaque `kernel-build` program this agent invokes per task
    /// (SPEC_FULL.md §4.5). Out of scope beyond its exit-code/path contract.
    pub binary: PathBuf,
    /// Directory the conventional `build/<commit>/linux-<commit>.tar.zst`
    /// artifact path is resolved relative to.
    pub working_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            binary: PathBuf::from("kernel-build"),
            working_dir: PathBuf::from("."),
        }
    }
}

impl SafeDisplay for PipelineConfig {
    fn to_safe_string(&self) -> String {
        format!(
            "binary: {}\nworking dir: {}\n",
            self.binary.display(),
            self.working_dir.display()
        )
    }
}

pub fn make_config_loader() -> ConfigLoader<WorkerAgentConfig> {
    ConfigLoader::new(&PathBuf::from("config/krepro-worker.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;

    #[test]
    fn config_is_loadable() {
        let config = make_config_loader().load().expect("failed to load config");
        assert_eq!(config.queue.queue_name, "task_queue");
    }
}
