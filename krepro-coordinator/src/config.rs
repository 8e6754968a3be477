use krepro_common::config::{ConfigLoader, DbConfig, QueueConfig};
use krepro_common::tracing_config::TracingConfig;
use krepro_common::SafeDisplay;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub tracing: TracingConfig,
    pub http_port: u16,
    pub grpc_port: u16,
    pub db: DbConfig,
    pub queue: QueueConfig,
    pub registry: RegistryConfig,
    pub artifacts: ArtifactConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            tracing: TracingConfig::local_dev("krepro-coordinator"),
            http_port: 8080,
            grpc_port: 8081,
            db: DbConfig::default(),
            queue: QueueConfig::default(),
            registry: RegistryConfig::default(),
            artifacts: ArtifactConfig::default(),
        }
    }
}

impl SafeDisplay for CoordinatorConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "tracing:");
        let _ = writeln!(&mut result, "{}", self.tracing.to_safe_string_indented());
        let _ = writeln!(&mut result, "HTTP port: {}", self.http_port);
        let _ = writeln!(&mut result, "gRPC port: {}", self.grpc_port);
        let _ = writeln!(&mut result, "DB:");
        let _ = writeln!(&mut result, "{}", self.db.to_safe_string_indented());
        let _ = writeln!(&mut result, "queue:");
        let _ = writeln!(&mut result, "{}", self.queue.to_safe_string_indented());
        let _ = writeln!(&mut result, "registry:");
        let _ = writeln!(&mut result, "{}", self.registry.to_safe_string_indented());
        let _ = writeln!(&mut result, "artifacts:");
        let _ = writeln!(&mut result, "{}", self.artifacts.to_safe_string_indented());
        result
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(with = "humantime_serde")]
    pub cleanup_interval: std::time::Duration,
    #[serde(with = "humantime_serde")]
    pub liveness_timeout: std::time::Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            cleanup_interval: std::time::Duration::from_secs(30),
            liveness_timeout: std::time::Duration::from_secs(120),
        }
    }
}

impl SafeDisplay for RegistryConfig {
    fn to_safe_string(&self) -> String {
        let mut result = String::new();
        let _ = writeln!(&mut result, "cleanup interval: {:?}", self.cleanup_interval);
        let _ = writeln!(&mut result, "liveness timeout: {:?}", self.liveness_timeout);
        result
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub root: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        ArtifactConfig {
            root: PathBuf::from("./artifacts"),
        }
    }
}

impl SafeDisplay for ArtifactConfig {
    fn to_safe_string(&self) -> String {
        format!("root: {}\n", self.root.display())
    }
}

pub fn make_config_loader() -> ConfigLoader<CoordinatorConfig> {
    ConfigLoader::new(&PathBuf::from("config/krepro-coordinator.toml"))
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
