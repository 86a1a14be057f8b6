//! Configuration loading and types for ferrylog.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the HTTP listener, cluster membership, lease handling,
//! logging, and observability. Every field is defaulted so a bare or
//! partial file works.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::cluster::peer::PeerRole;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Cluster membership settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Lease handling settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind host address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port.
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
        }
    }
}

/// Cluster membership configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Gossip bind address.
    #[serde(default = "default_host")]
    pub bind_addr: String,

    /// Gossip bind port.
    #[serde(default = "default_cluster_port")]
    pub bind_port: u16,

    /// Seed endpoints (`host:port`) contacted on startup.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Role advertised to the cluster.
    #[serde(default = "default_role")]
    pub role: PeerRole,

    /// Bound on the graceful leave at shutdown, in seconds.
    #[serde(default = "default_leave_timeout")]
    pub leave_timeout_secs: u64,
}

impl ClusterConfig {
    pub fn leave_timeout(&self) -> Duration {
        Duration::from_secs(self.leave_timeout_secs)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_host(),
            bind_port: default_cluster_port(),
            seeds: Vec::new(),
            role: default_role(),
            leave_timeout_secs: default_leave_timeout(),
        }
    }
}

/// Lease handling configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Seconds a consumer may hold a pending lease before the sweeper
    /// fails it back into the log.
    #[serde(default = "default_pending_timeout")]
    pub pending_timeout_secs: u64,
}

impl IngestConfig {
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            pending_timeout_secs: default_pending_timeout(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus recorder and `/metrics` endpoint.
    #[serde(default = "default_true")]
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self { metrics: true }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    7650
}

fn default_cluster_port() -> u16 {
    7659
}

fn default_role() -> PeerRole {
    PeerRole::Ingest
}

fn default_leave_timeout() -> u64 {
    5
}

fn default_pending_timeout() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.server.port, 7650);
        assert_eq!(config.cluster.bind_port, 7659);
        assert_eq!(config.cluster.role, PeerRole::Ingest);
        assert!(config.cluster.seeds.is_empty());
        assert_eq!(config.ingest.pending_timeout(), Duration::from_secs(60));
        assert!(config.observability.metrics);
    }

    #[test]
    fn partial_document_overrides_selectively() {
        let yaml = r#"
server:
  port: 9100
cluster:
  role: ingeststore
  seeds: ["10.0.0.1:7659"]
ingest:
  pending_timeout_secs: 5
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cluster.role, PeerRole::IngestStore);
        assert_eq!(config.cluster.seeds, vec!["10.0.0.1:7659"]);
        assert_eq!(config.ingest.pending_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn unknown_role_is_rejected() {
        assert!(serde_yaml::from_str::<Config>("cluster:\n  role: witness\n").is_err());
    }
}
