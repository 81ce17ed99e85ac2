pub mod config;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
