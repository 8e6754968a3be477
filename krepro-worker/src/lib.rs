pub mod agent;
pub mod config;
pub mod http_client;
pub mod identity;
pub mod logstream;
pub mod pipeline;
pub mod queue;

#[cfg(test)]
test_r::enable!();
