pub mod config;
pub mod model;
pub mod tracing_config;

pub use config::ConfigLoader;
pub use tracing_config::TracingConfig;

/// Generated client and server stubs for the log-ingest RPC (SPEC_FULL.md
/// §4.4, §6). Shared between the coordinator (server side) and the worker
/// agent (client side), mirroring this codebase's own `*-api-grpc` crates
/// that compile a proto once for every side that speaks it.
pub mod logingest {
    tonic::include_proto!("krepro.logingest.v1");
}

#[cfg(test)]
test_r::enable!();

/// Renders a config struct with any secret fields redacted, for safe inclusion in
/// startup logs. Never derive `Display`/`Debug` on a struct that carries a live
/// secret and print it directly - implement this instead.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;

    fn to_safe_string_indented(&self) -> String {
        self.to_safe_string()
            .lines()
            .map(|line| format!("  {line}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
