//! Control-plane data model
//!
//! Types exchanged with the control plane during the handshake and pushed
//! back to subscribers afterwards. All wire types use camelCase JSON.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Reachable network endpoint (ip + port).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressConfiguration {
    pub ip: String,
    pub port: String,
}

impl AddressConfiguration {
    pub fn new(ip: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: port.into(),
        }
    }
}

impl fmt::Display for AddressConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

/// Where a metrics scraper can find this module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsAutodiscovery {
    pub address: String,
}

/// One endpoint exposed by a module.
///
/// `handler` is the transport-level handler reference; it never leaves the
/// process and is skipped by serialization.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub path: String,
    /// Only callable from inside the cluster
    pub inner: bool,
    pub user_auth_required: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
    #[serde(skip)]
    pub handler: Option<Arc<dyn Any + Send + Sync>>,
}

impl EndpointDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn inner(mut self, inner: bool) -> Self {
        self.inner = inner;
        self
    }

    pub fn with_user_auth(mut self, required: bool) -> Self {
        self.user_auth_required = required;
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn with_handler<H: Any + Send + Sync>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }
}

/// Per-process identity, built once at startup.
#[derive(Clone, Debug, Default)]
pub struct ModuleInfo {
    pub module_name: String,
    pub module_version: String,
    pub lib_version: String,
    /// Transport kind the module serves on (e.g. "grpc", "http")
    pub transport: String,
    pub address: AddressConfiguration,
    pub endpoints: Vec<EndpointDescriptor>,
    pub metrics_autodiscovery: Option<MetricsAutodiscovery>,
}

impl ModuleInfo {
    pub fn new(
        module_name: impl Into<String>,
        module_version: impl Into<String>,
        address: AddressConfiguration,
    ) -> Self {
        Self {
            module_name: module_name.into(),
            module_version: module_version.into(),
            lib_version: env!("CARGO_PKG_VERSION").to_string(),
            transport: "grpc".to_string(),
            address,
            endpoints: Vec::new(),
            metrics_autodiscovery: None,
        }
    }

    pub fn with_transport(mut self, transport: impl Into<String>) -> Self {
        self.transport = transport.into();
        self
    }

    pub fn with_lib_version(mut self, lib_version: impl Into<String>) -> Self {
        self.lib_version = lib_version.into();
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<EndpointDescriptor>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_metrics_autodiscovery(mut self, address: impl Into<String>) -> Self {
        self.metrics_autodiscovery = Some(MetricsAutodiscovery {
            address: address.into(),
        });
        self
    }
}

/// Configuration contract offered to the control plane.
///
/// `schema` and `config` are opaque to this crate; the control plane validates
/// remote configs against `schema` and falls back to `config` as defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigData {
    pub version: String,
    pub schema: Value,
    pub config: Value,
}

/// Subscription intent announced during the handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleRequirements {
    pub required_modules: Vec<String>,
    pub require_routes: bool,
}

/// A declared dependency on another module.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDependency {
    pub name: String,
    pub required: bool,
}

/// Full self-description a module sends once it is ready to serve.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendDeclaration {
    pub module_name: String,
    pub version: String,
    pub lib_version: String,
    #[serde(default)]
    pub transport: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointDescriptor>,
    #[serde(default)]
    pub required_modules: Vec<ModuleDependency>,
    pub address: AddressConfiguration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_autodiscovery: Option<MetricsAutodiscovery>,
}

/// The cluster-wide routing catalog: one declaration per module.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingConfig(#[serde(deserialize_with = "null_as_empty")] pub Vec<BackendDeclaration>);

impl RoutingConfig {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BackendDeclaration> {
        self.0.iter()
    }

    /// Declarations of every instance of `module_name`.
    pub fn module(&self, module_name: &str) -> Vec<&BackendDeclaration> {
        self.0
            .iter()
            .filter(|decl| decl.module_name == module_name)
            .collect()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<BackendDeclaration>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<BackendDeclaration>>::deserialize(deserializer)?.unwrap_or_default())
}
