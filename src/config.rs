use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level configuration for the procserve daemon.
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Logging verbosity (debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    #[allow(dead_code)]
    pub log_level: String,

    /// TCP listener configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// System metrics sampling configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// TCP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address. Default: all interfaces.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port. Default: 12345.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Listen backlog. Default: 5.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Greeting line sent to every client on connect.
    #[serde(default = "default_greeting")]
    pub greeting: String,
}

/// System metrics sampling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// How often the sampler refreshes system metrics. Default: 1s.
    #[serde(default = "default_sample_interval", with = "humantime_serde")]
    pub sample_interval: Duration,

    /// Retained entries per history series. Default: 100.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            greeting: default_greeting(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            sample_interval: default_sample_interval(),
            history_capacity: default_history_capacity(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    12345
}

fn default_backlog() -> u32 {
    5
}

fn default_greeting() -> String {
    "Servidor de procesos conectado.".to_string()
}

fn default_sample_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_history_capacity() -> usize {
    100
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            bail!("server.host must not be empty");
        }

        if self.server.backlog == 0 {
            bail!("server.backlog must be positive");
        }

        if self.metrics.sample_interval.is_zero() {
            bail!("metrics.sample_interval must be positive");
        }

        if self.metrics.history_capacity == 0 {
            bail!("metrics.history_capacity must be positive");
        }

        Ok(())
    }
}
