//! Control-plane client for running without a control plane
//!
//! Remote configuration is read once from a local file instead of being
//! pushed over a session.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use config::Config;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::client::ControlPlaneClient;
use crate::error::Result;
use crate::health::HealthCheck;
use crate::registry::SubscriptionRegistry;

/// Offline stand-in for [`ClusterClient`](crate::ClusterClient).
#[derive(Clone, Debug)]
pub struct OfflineClusterClient {
    config_path: PathBuf,
}

impl OfflineClusterClient {
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Read the config file (YAML, JSON or TOML by extension) as JSON.
    pub fn read_config(&self) -> Result<serde_json::Value> {
        let value = Config::builder()
            .add_source(config::File::from(self.config_path.as_path()))
            .build()?
            .try_deserialize::<serde_json::Value>()?;
        Ok(value)
    }

    /// Apply the local config to the registry's remote config receiver, if
    /// one is registered, and return.
    pub async fn run(&self, cancel: &CancellationToken, registry: SubscriptionRegistry) -> Result<()> {
        if !registry.has_remote_config_receiver() {
            info!(
                path = %self.config_path.display(),
                "No remote config receiver registered, nothing to apply"
            );
            return Ok(());
        }

        let config = self.read_config()?;
        let payload = Bytes::from(serde_json::to_vec(&config)?);
        registry.apply_remote_config(cancel, payload).await?;

        info!(path = %self.config_path.display(), "Local config applied");
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneClient for OfflineClusterClient {
    async fn run(&self, cancel: &CancellationToken, registry: SubscriptionRegistry) -> Result<()> {
        OfflineClusterClient::run(self, cancel, registry).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

impl HealthCheck for OfflineClusterClient {
    fn name(&self) -> &str {
        "control-plane"
    }

    fn check(&self) -> Result<()> {
        Ok(())
    }
}
