//! Control-plane client configuration

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};
use crate::transport::connection_url;

/// Prefix of the environment overrides read by [`ClusterClientConfig::load`],
/// e.g. `STRATUS_CLUSTER_HOSTS=10.0.0.5:9001,10.0.0.6:9001`.
pub const ENV_PREFIX: &str = "STRATUS_CLUSTER";

/// Connection settings for [`ClusterClient`](crate::ClusterClient).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterClientConfig {
    /// Control-plane hosts (`host:port`), rotated round-robin
    pub hosts: Vec<String>,
    /// URL scheme of the event socket
    pub scheme: String,
    /// URL path of the event socket endpoint
    pub path: String,
    /// Interval between liveness pings in milliseconds
    pub ping_interval_ms: u64,
    /// Ping timeout in milliseconds
    pub ping_timeout_ms: u64,
    /// Pause between sessions in milliseconds
    pub reconnect_delay_ms: u64,
    /// Handshake and readiness ack timeout in milliseconds
    pub ack_timeout_ms: u64,
}

impl Default for ClusterClientConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            scheme: "ws".to_string(),
            path: "/isp-etp/".to_string(),
            ping_interval_ms: 1000,
            ping_timeout_ms: 1000,
            reconnect_delay_ms: 1000,
            ack_timeout_ms: 1000,
        }
    }
}

impl ClusterClientConfig {
    /// Create a config for a single control-plane host
    pub fn new(host: &str) -> Self {
        Self {
            hosts: vec![host.to_string()],
            ..Default::default()
        }
    }

    /// Create a config with multiple control-plane hosts
    pub fn with_hosts(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            ..Default::default()
        }
    }

    /// Set ping interval and timeout
    pub fn with_ping(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.ping_interval_ms = interval_ms;
        self.ping_timeout_ms = timeout_ms;
        self
    }

    pub fn with_reconnect_delay(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_ack_timeout(mut self, timeout_ms: u64) -> Self {
        self.ack_timeout_ms = timeout_ms;
        self
    }

    pub fn with_endpoint(mut self, scheme: &str, path: &str) -> Self {
        self.scheme = scheme.to_string();
        self.path = path.to_string();
        self
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Reject settings no session could run with.
    ///
    /// An empty host list is allowed: hosts may be supplied later through the
    /// balancer, and every session attempt fails with `NoHosts` until then.
    pub fn validate(&self) -> Result<()> {
        if self.scheme.is_empty() {
            return Err(ClusterError::InvalidConfig("scheme must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(ClusterError::InvalidConfig(format!(
                "path must start with '/': {}",
                self.path
            )));
        }
        if self.ping_interval_ms == 0 || self.ping_timeout_ms == 0 || self.ack_timeout_ms == 0 {
            return Err(ClusterError::InvalidConfig(
                "ping interval, ping timeout and ack timeout must be positive".to_string(),
            ));
        }
        if let Some(host) = self.hosts.iter().find(|host| host.trim().is_empty()) {
            return Err(ClusterError::InvalidConfig(format!("blank host entry: {:?}", host)));
        }
        for host in &self.hosts {
            connection_url(&self.scheme, host, &self.path, "").map_err(|e| {
                ClusterError::InvalidConfig(format!("invalid host {:?}: {}", host, e))
            })?;
        }
        Ok(())
    }

    /// Load from a YAML, JSON or TOML file (format by extension) with
    /// `STRATUS_CLUSTER_*` environment overrides on top.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env(path.as_ref(), env_source())
    }

    fn load_with_env(path: &Path, env: Environment) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(config::File::from(path))
            .add_source(env)
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("hosts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(extension: &str, content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(extension)
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = ClusterClientConfig::default();
        assert!(config.hosts.is_empty());
        assert_eq!(config.ping_interval(), Duration::from_secs(1));
        assert_eq!(config.ping_timeout(), Duration::from_secs(1));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.ack_timeout(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ClusterClientConfig::new("10.0.0.5:9001")
            .with_ping(500, 250)
            .with_reconnect_delay(2000)
            .with_ack_timeout(3000)
            .with_endpoint("wss", "/etp/");

        assert_eq!(config.hosts, vec!["10.0.0.5:9001"]);
        assert_eq!(config.ping_interval(), Duration::from_millis(500));
        assert_eq!(config.ping_timeout(), Duration::from_millis(250));
        assert_eq!(config.reconnect_delay(), Duration::from_secs(2));
        assert_eq!(config.ack_timeout(), Duration::from_secs(3));
        assert_eq!(config.scheme, "wss");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ClusterClientConfig::default().with_ping(0, 1000).validate().is_err());
        assert!(ClusterClientConfig::default().with_endpoint("ws", "isp-etp").validate().is_err());
        assert!(ClusterClientConfig::with_hosts(vec![" ".to_string()]).validate().is_err());
        assert!(ClusterClientConfig::new("cp.local:9001").validate().is_ok());
        // A zero reconnect delay only means "retry immediately".
        assert!(ClusterClientConfig::default().with_reconnect_delay(0).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_unparsable_hosts() {
        for host in ["bad host:9001", "10.0.0.5:xx"] {
            let err = ClusterClientConfig::with_hosts(vec!["10.0.0.5:9001".to_string(), host.to_string()])
                .validate()
                .unwrap_err();
            assert!(err.is_fatal(), "{host} should be rejected");
            assert!(err.to_string().contains(host));
        }
    }

    #[test]
    fn test_load_yaml_fills_defaults() {
        let file = write_config(
            ".yaml",
            "hosts:\n  - 10.0.0.5:9001\n  - 10.0.0.6:9001\nping_interval_ms: 2000\n",
        );

        let config = ClusterClientConfig::load(file.path()).unwrap();

        assert_eq!(config.hosts, vec!["10.0.0.5:9001", "10.0.0.6:9001"]);
        assert_eq!(config.ping_interval_ms, 2000);
        assert_eq!(config.path, "/isp-etp/");
    }

    #[test]
    fn test_load_json() {
        let file = write_config(".json", r#"{"hosts": ["cp.local:9001"], "scheme": "wss"}"#);

        let config = ClusterClientConfig::load(file.path()).unwrap();

        assert_eq!(config.hosts, vec!["cp.local:9001"]);
        assert_eq!(config.scheme, "wss");
    }

    #[test]
    fn test_environment_overrides_file() {
        let file = write_config(".toml", "hosts = [\"10.0.0.5:9001\"]\nack_timeout_ms = 500\n");
        let env = config::Map::from([
            ("STRATUS_CLUSTER_HOSTS".to_string(), "a:1,b:2".to_string()),
            ("STRATUS_CLUSTER_RECONNECT_DELAY_MS".to_string(), "250".to_string()),
        ]);

        let config =
            ClusterClientConfig::load_with_env(file.path(), env_source().source(Some(env)))
                .unwrap();

        assert_eq!(config.hosts, vec!["a:1", "b:2"]);
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.ack_timeout_ms, 500);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let file = write_config(".yaml", "ping_timeout_ms: 0\n");
        let err = ClusterClientConfig::load(file.path()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_load_missing_file() {
        let err = ClusterClientConfig::load("/nonexistent/stratus-cluster.yaml").unwrap_err();
        assert!(matches!(err, ClusterError::Config(_)));
    }
}
