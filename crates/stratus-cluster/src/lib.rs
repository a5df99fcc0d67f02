//! Stratus Cluster - control-plane client
//!
//! This crate registers a service instance with the cluster control plane,
//! keeps a live session open against it, and delivers three kinds of dynamic
//! state to the running process:
//! - Host lists of the modules it depends on
//! - The cluster-wide routing catalog
//! - Its own remote configuration
//!
//! ```ignore
//! let client = ClusterClient::new(module_info, config_data, config, dialer);
//! let registry = SubscriptionRegistry::new()
//!     .require_module("auth", auth_balancer.clone())
//!     .routes_receiver(router)
//!     .remote_config_receiver(settings);
//! client.run(&cancel, registry).await?;
//! ```

pub mod balancer;
pub mod client;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod health;
pub mod model;
pub mod offline;
pub mod registry;
pub mod session;
pub mod transport;

pub use balancer::RoundRobinBalancer;
pub use client::{ClusterClient, ControlPlaneClient};
pub use crate::config::ClusterClientConfig;
pub use error::{ClusterError, Result};
pub use handshake::Handshake;
pub use health::HealthCheck;
pub use model::{
    AddressConfiguration, BackendDeclaration, ConfigData, EndpointDescriptor,
    MetricsAutodiscovery, ModuleDependency, ModuleInfo, ModuleRequirements, RoutingConfig,
};
pub use offline::OfflineClusterClient;
pub use registry::{
    DEFAULT_REMOTE_CONFIG_TIMEOUT, FnHostsUpgrader, HostsUpgrader, RemoteConfigReceiver,
    RoutesReceiver, SubscriptionRegistry,
};
pub use session::{SessionContext, TransportSession};
pub use transport::memory::MemoryControlPlane;
pub use transport::{Dialer, EventHandler, EventSocket};
