//! Common test utilities for control-plane client tests
//!
//! This module provides:
//! - Module identity and client builders wired to a `MemoryControlPlane`
//! - Recording and hanging receivers for the subscription registry
//! - A guard that bounds every wait so a broken test fails instead of hanging

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{Value, json};
use stratus_cluster::{
    AddressConfiguration, ClusterClient, ClusterClientConfig, ConfigData, EndpointDescriptor,
    MemoryControlPlane, ModuleInfo, RemoteConfigReceiver, RoutesReceiver, RoutingConfig,
    SubscriptionRegistry,
};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const HOST_A: &str = "10.0.0.5:9001";
pub const HOST_B: &str = "10.0.0.6:9001";

/// Upper bound for any single wait in a test.
pub const WAIT_LIMIT: Duration = Duration::from_secs(30);

pub fn module_info() -> ModuleInfo {
    ModuleInfo::new("billing", "1.4.0", AddressConfiguration::new("10.0.1.7", "9000"))
        .with_endpoints(vec![
            EndpointDescriptor::new("/billing/charge"),
            EndpointDescriptor::new("/billing/internal/reconcile").inner(true),
        ])
}

pub fn config_data() -> ConfigData {
    ConfigData {
        version: "1.4.0".to_string(),
        schema: json!({"type": "object", "properties": {"database": {"type": "object"}}}),
        config: json!({"database": {"url": "postgres://db", "password": "changeme"}}),
    }
}

pub fn client_config(hosts: &[&str]) -> ClusterClientConfig {
    ClusterClientConfig::with_hosts(hosts.iter().map(|h| h.to_string()).collect())
}

pub fn client(plane: &MemoryControlPlane, config: ClusterClientConfig) -> Arc<ClusterClient> {
    Arc::new(ClusterClient::new(
        module_info(),
        config_data(),
        config,
        Arc::new(plane.clone()),
    ))
}

/// Run `client` on its own task.
pub fn spawn_run(
    client: &Arc<ClusterClient>,
    registry: SubscriptionRegistry,
) -> (CancellationToken, JoinHandle<stratus_cluster::Result<()>>) {
    let cancel = CancellationToken::new();
    let task = {
        let client = client.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { client.run(&cancel, registry).await })
    };
    (cancel, task)
}

/// Await `future`, failing the test if it takes longer than [`WAIT_LIMIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT_LIMIT, future)
        .await
        .expect("wait limit exceeded")
}

pub fn hosts(list: &[&str]) -> Vec<String> {
    list.iter().map(|h| h.to_string()).collect()
}

#[derive(Clone, Default)]
pub struct RecordingRoutes {
    pub received: Arc<Mutex<Vec<RoutingConfig>>>,
}

#[async_trait]
impl RoutesReceiver for RecordingRoutes {
    async fn receive_routes(
        &self,
        _cancel: CancellationToken,
        routes: RoutingConfig,
    ) -> anyhow::Result<()> {
        self.received.lock().push(routes);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingConfig {
    pub received: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl RemoteConfigReceiver for RecordingConfig {
    async fn receive_config(&self, _cancel: CancellationToken, config: Bytes) -> anyhow::Result<()> {
        let value: Value = serde_json::from_slice(&config)?;
        self.received.lock().push(value);
        Ok(())
    }
}

/// Never returns until its token is cancelled, then signals `stopped`.
#[derive(Clone, Default)]
pub struct HangingConfig {
    pub stopped: Arc<Notify>,
}

#[async_trait]
impl RemoteConfigReceiver for HangingConfig {
    async fn receive_config(&self, cancel: CancellationToken, _config: Bytes) -> anyhow::Result<()> {
        cancel.cancelled().await;
        self.stopped.notify_one();
        anyhow::bail!("interrupted")
    }
}

pub fn routes_payload() -> &'static str {
    r#"[
        {
            "moduleName": "billing",
            "version": "1.4.0",
            "libVersion": "0.1.0",
            "address": {"ip": "10.0.1.7", "port": "9000"},
            "endpoints": [{"path": "/billing/charge", "inner": false, "userAuthRequired": true}]
        },
        {
            "moduleName": "auth",
            "version": "2.0.0",
            "libVersion": "0.1.0",
            "address": {"ip": "10.0.1.8", "port": "9000"},
            "requiredModules": [{"name": "billing", "required": true}]
        }
    ]"#
}
