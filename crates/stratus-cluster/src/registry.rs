//! Subscription registry
//!
//! A service declares once, before `run`, what it wants from the control
//! plane: host lists of the modules it depends on, the routing catalog, and
//! its own remote configuration. The registry is immutable while sessions
//! run, so event handlers read it concurrently without locking.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::error::{ClusterError, Result};
use crate::model::{ModuleRequirements, RoutingConfig};

/// Default bound on one remote-config application.
pub const DEFAULT_REMOTE_CONFIG_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives the current host list of a required module.
pub trait HostsUpgrader: Send + Sync + 'static {
    fn upgrade(&self, hosts: Vec<String>);
}

/// A simple upgrader that invokes a closure.
pub struct FnHostsUpgrader<F>
where
    F: Fn(Vec<String>) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnHostsUpgrader<F>
where
    F: Fn(Vec<String>) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> HostsUpgrader for FnHostsUpgrader<F>
where
    F: Fn(Vec<String>) + Send + Sync + 'static,
{
    fn upgrade(&self, hosts: Vec<String>) {
        (self.f)(hosts);
    }
}

impl<T: HostsUpgrader + ?Sized> HostsUpgrader for Arc<T> {
    fn upgrade(&self, hosts: Vec<String>) {
        (**self).upgrade(hosts);
    }
}

/// Receives every routing catalog pushed by the control plane.
#[async_trait]
pub trait RoutesReceiver: Send + Sync + 'static {
    async fn receive_routes(
        &self,
        cancel: CancellationToken,
        routes: RoutingConfig,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<T: RoutesReceiver + ?Sized> RoutesReceiver for Arc<T> {
    async fn receive_routes(
        &self,
        cancel: CancellationToken,
        routes: RoutingConfig,
    ) -> anyhow::Result<()> {
        (**self).receive_routes(cancel, routes).await
    }
}

/// Applies remote configuration pushed by the control plane.
///
/// `cancel` fires when the application timeout elapses or the session ends;
/// implementations must stop work once it does.
#[async_trait]
pub trait RemoteConfigReceiver: Send + Sync + 'static {
    async fn receive_config(&self, cancel: CancellationToken, config: Bytes)
    -> anyhow::Result<()>;
}

#[async_trait]
impl<T: RemoteConfigReceiver + ?Sized> RemoteConfigReceiver for Arc<T> {
    async fn receive_config(
        &self,
        cancel: CancellationToken,
        config: Bytes,
    ) -> anyhow::Result<()> {
        (**self).receive_config(cancel, config).await
    }
}

#[derive(Clone)]
struct RemoteConfigSubscription {
    receiver: Arc<dyn RemoteConfigReceiver>,
    timeout: Duration,
}

/// Declarative set of control-plane subscriptions.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    upgraders: BTreeMap<String, Arc<dyn HostsUpgrader>>,
    routes: Option<Arc<dyn RoutesReceiver>>,
    remote_config: Option<RemoteConfigSubscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to the host list of `module_name`. A later registration for
    /// the same module replaces the earlier one.
    pub fn require_module(
        mut self,
        module_name: impl Into<String>,
        upgrader: impl HostsUpgrader,
    ) -> Self {
        self.upgraders.insert(module_name.into(), Arc::new(upgrader));
        self
    }

    /// Subscribe to the routing catalog.
    pub fn routes_receiver(mut self, receiver: impl RoutesReceiver) -> Self {
        self.routes = Some(Arc::new(receiver));
        self
    }

    /// Subscribe to remote configuration, bounded by
    /// [`DEFAULT_REMOTE_CONFIG_TIMEOUT`].
    pub fn remote_config_receiver(self, receiver: impl RemoteConfigReceiver) -> Self {
        self.remote_config_receiver_with_timeout(receiver, DEFAULT_REMOTE_CONFIG_TIMEOUT)
    }

    pub fn remote_config_receiver_with_timeout(
        mut self,
        receiver: impl RemoteConfigReceiver,
        timeout: Duration,
    ) -> Self {
        self.remote_config = Some(RemoteConfigSubscription {
            receiver: Arc::new(receiver),
            timeout,
        });
        self
    }

    /// Subscription intent announced during the handshake.
    pub fn requirements(&self) -> ModuleRequirements {
        ModuleRequirements {
            required_modules: self.required_module_names(),
            require_routes: self.has_routes_receiver(),
        }
    }

    pub fn required_module_names(&self) -> Vec<String> {
        self.upgraders.keys().cloned().collect()
    }

    pub fn has_routes_receiver(&self) -> bool {
        self.routes.is_some()
    }

    pub fn has_remote_config_receiver(&self) -> bool {
        self.remote_config.is_some()
    }

    pub fn remote_config_timeout(&self) -> Option<Duration> {
        self.remote_config.as_ref().map(|sub| sub.timeout)
    }

    /// Hand `hosts` to the upgrader of `module_name`. Returns false when the
    /// module was never required.
    pub fn upgrade_hosts(&self, module_name: &str, hosts: Vec<String>) -> bool {
        match self.upgraders.get(module_name) {
            Some(upgrader) => {
                upgrader.upgrade(hosts);
                true
            }
            None => false,
        }
    }

    /// Hand `routes` to the routes receiver, if one is registered.
    pub async fn receive_routes(
        &self,
        cancel: &CancellationToken,
        routes: RoutingConfig,
    ) -> Result<()> {
        let Some(receiver) = &self.routes else {
            return Ok(());
        };
        receiver
            .receive_routes(cancel.child_token(), routes)
            .await
            .map_err(ClusterError::Receiver)
    }

    /// Apply a remote config push within the registered timeout.
    ///
    /// The receiver runs on its own task. When the timeout elapses first, its
    /// token is cancelled and a `Timeout` error is returned right away; the
    /// task itself is left to finish on its own.
    pub async fn apply_remote_config(
        &self,
        cancel: &CancellationToken,
        config: Bytes,
    ) -> Result<()> {
        let Some(sub) = &self.remote_config else {
            return Ok(());
        };

        let apply_cancel = cancel.child_token();
        let receiver = sub.receiver.clone();
        let receiver_cancel = apply_cancel.clone();
        let task =
            tokio::spawn(async move { receiver.receive_config(receiver_cancel, config).await });

        tokio::select! {
            joined = task => match joined {
                Ok(result) => result.map_err(ClusterError::Receiver),
                Err(e) => Err(ClusterError::Receiver(anyhow::anyhow!(
                    "remote config receiver task failed: {}",
                    e
                ))),
            },
            _ = tokio::time::sleep(sub.timeout) => {
                apply_cancel.cancel();
                Err(ClusterError::Timeout {
                    operation: "remote config apply",
                    timeout: sub.timeout,
                })
            }
            _ = cancel.cancelled() => Err(ClusterError::Cancelled),
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("required_modules", &self.required_module_names())
            .field("routes", &self.has_routes_receiver())
            .field("remote_config_timeout", &self.remote_config_timeout())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::sync::Notify;

    struct RecordingRoutes(Arc<Mutex<Vec<RoutingConfig>>>);

    #[async_trait]
    impl RoutesReceiver for RecordingRoutes {
        async fn receive_routes(
            &self,
            _cancel: CancellationToken,
            routes: RoutingConfig,
        ) -> anyhow::Result<()> {
            self.0.lock().push(routes);
            Ok(())
        }
    }

    struct StaticConfig(std::result::Result<(), &'static str>);

    #[async_trait]
    impl RemoteConfigReceiver for StaticConfig {
        async fn receive_config(
            &self,
            _cancel: CancellationToken,
            _config: Bytes,
        ) -> anyhow::Result<()> {
            self.0.map_err(|e| anyhow::anyhow!(e))
        }
    }

    /// Never finishes on its own; reports when it observes cancellation.
    struct HangingConfig {
        cancelled: Arc<Notify>,
    }

    #[async_trait]
    impl RemoteConfigReceiver for HangingConfig {
        async fn receive_config(
            &self,
            cancel: CancellationToken,
            _config: Bytes,
        ) -> anyhow::Result<()> {
            cancel.cancelled().await;
            self.cancelled.notify_one();
            Ok(())
        }
    }

    #[test]
    fn test_requirements_from_registrations() {
        let registry = SubscriptionRegistry::new()
            .require_module("billing", FnHostsUpgrader::new(|_| {}))
            .require_module("auth", FnHostsUpgrader::new(|_| {}))
            .routes_receiver(RecordingRoutes(Arc::default()));

        let req = registry.requirements();
        assert_eq!(req.required_modules, vec!["auth", "billing"]);
        assert!(req.require_routes);
        assert!(!registry.has_remote_config_receiver());
        assert_eq!(registry.remote_config_timeout(), None);

        let empty = SubscriptionRegistry::new().requirements();
        assert!(empty.required_modules.is_empty());
        assert!(!empty.require_routes);
    }

    #[test]
    fn test_upgrade_hosts_dispatches_by_module() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let registry = SubscriptionRegistry::new().require_module(
            "billing",
            FnHostsUpgrader::new(move |hosts| seen_clone.lock().push(hosts)),
        );

        assert!(registry.upgrade_hosts("billing", vec!["10.0.0.1:9000".to_string()]));
        assert!(!registry.upgrade_hosts("auth", vec![]));
        assert_eq!(*seen.lock(), vec![vec!["10.0.0.1:9000".to_string()]]);
    }

    #[tokio::test]
    async fn test_receive_routes() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let registry = SubscriptionRegistry::new().routes_receiver(RecordingRoutes(received.clone()));

        registry
            .receive_routes(&CancellationToken::new(), RoutingConfig::default())
            .await
            .unwrap();

        assert_eq!(received.lock().len(), 1);
        // No receiver registered
        SubscriptionRegistry::new()
            .receive_routes(&CancellationToken::new(), RoutingConfig::default())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_apply_remote_config_result() {
        let cancel = CancellationToken::new();
        let ok = SubscriptionRegistry::new().remote_config_receiver(StaticConfig(Ok(())));
        assert_eq!(ok.remote_config_timeout(), Some(DEFAULT_REMOTE_CONFIG_TIMEOUT));
        ok.apply_remote_config(&cancel, Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let failing =
            SubscriptionRegistry::new().remote_config_receiver(StaticConfig(Err("bad value")));
        let err = failing
            .apply_remote_config(&cancel, Bytes::from_static(b"{}"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::Receiver(_)));
        assert!(err.to_string().contains("bad value"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_remote_config_times_out_after_exact_bound() {
        let cancelled = Arc::new(Notify::new());
        let registry = SubscriptionRegistry::new().remote_config_receiver(HangingConfig {
            cancelled: cancelled.clone(),
        });

        let started = tokio::time::Instant::now();
        let err = registry
            .apply_remote_config(&CancellationToken::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap_err();

        assert_eq!(started.elapsed(), DEFAULT_REMOTE_CONFIG_TIMEOUT);
        assert!(matches!(
            err,
            ClusterError::Timeout {
                operation: "remote config apply",
                timeout
            } if timeout == DEFAULT_REMOTE_CONFIG_TIMEOUT
        ));
        // The receiver observes the cancelled token and winds down.
        cancelled.notified().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_remote_config_custom_timeout() {
        let registry = SubscriptionRegistry::new().remote_config_receiver_with_timeout(
            HangingConfig {
                cancelled: Arc::new(Notify::new()),
            },
            Duration::from_millis(200),
        );

        let started = tokio::time::Instant::now();
        let result = registry
            .apply_remote_config(&CancellationToken::new(), Bytes::new())
            .await;

        assert!(result.is_err());
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_apply_remote_config_observes_parent_cancel() {
        let cancelled = Arc::new(Notify::new());
        let registry = SubscriptionRegistry::new().remote_config_receiver(HangingConfig {
            cancelled: cancelled.clone(),
        });
        let cancel = CancellationToken::new();

        let (result, _) = tokio::join!(
            registry.apply_remote_config(&cancel, Bytes::new()),
            async {
                tokio::task::yield_now().await;
                cancel.cancel();
            }
        );

        assert!(result.unwrap_err().is_cancelled());
        cancelled.notified().await;
    }

    #[test]
    fn test_debug_lists_subscriptions() {
        let registry = SubscriptionRegistry::new()
            .require_module("billing", FnHostsUpgrader::new(|_| {}));
        let debug = format!("{:?}", registry);
        assert!(debug.contains("billing"));
    }
}
