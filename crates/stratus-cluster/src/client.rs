//! Session supervisor
//!
//! `ClusterClient` keeps one session open against the control plane at a
//! time. Each session picks the next host, registers through the handshake,
//! wires inbound events to the [`SubscriptionRegistry`], and then pings until
//! the connection fails; after a fixed delay the next host is tried.
//!
//! Liveness failures (dial, ack, ping) end the session. Failures while
//! applying a single update are logged and never affect the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use stratus_log::RedactionRules;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::balancer::RoundRobinBalancer;
use crate::config::ClusterClientConfig;
use crate::error::{ClusterError, Result};
use crate::event;
use crate::handshake::Handshake;
use crate::health::{HealthCheck, SessionHealth};
use crate::model::{ConfigData, ModuleInfo, RoutingConfig};
use crate::registry::SubscriptionRegistry;
use crate::session::{SessionContext, TransportSession};
use crate::transport::{Dialer, EventHandler};

/// Common contract of the online and offline control-plane clients.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    /// Deliver the registry's subscriptions until `cancel` fires or the
    /// client is closed.
    async fn run(&self, cancel: &CancellationToken, registry: SubscriptionRegistry) -> Result<()>;

    /// Stop a running client. Always succeeds.
    async fn close(&self) -> Result<()>;
}

/// Control-plane client backed by a live event-socket session.
pub struct ClusterClient {
    module_info: Arc<ModuleInfo>,
    config_data: Arc<ConfigData>,
    config: Arc<ClusterClientConfig>,
    balancer: Arc<RoundRobinBalancer>,
    dialer: Arc<dyn Dialer>,
    redaction: RedactionRules,
    shutdown: CancellationToken,
    ready: watch::Sender<bool>,
    health: SessionHealth,
    running: AtomicBool,
}

impl ClusterClient {
    pub fn new(
        module_info: ModuleInfo,
        config_data: ConfigData,
        config: ClusterClientConfig,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let balancer = Arc::new(RoundRobinBalancer::new(config.hosts.clone()));
        let (ready, _) = watch::channel(false);
        Self {
            module_info: Arc::new(module_info),
            config_data: Arc::new(config_data),
            config: Arc::new(config),
            balancer,
            dialer,
            redaction: RedactionRules::default(),
            shutdown: CancellationToken::new(),
            ready,
            health: SessionHealth::default(),
            running: AtomicBool::new(false),
        }
    }

    /// Use the process-wide redaction rules for payload logging.
    pub fn with_redaction(mut self, redaction: RedactionRules) -> Self {
        self.redaction = redaction;
        self
    }

    /// Balancer over the control-plane hosts.
    pub fn balancer(&self) -> Arc<RoundRobinBalancer> {
        self.balancer.clone()
    }

    pub fn module_info(&self) -> &ModuleInfo {
        &self.module_info
    }

    /// Mark the module ready to receive traffic.
    ///
    /// The current session announces `MODULE:READY` right away, and every
    /// later session announces it once after registering.
    pub fn module_ready(&self) {
        self.ready.send_replace(true);
    }

    /// A session is alive and its last ping succeeded.
    pub fn is_healthy(&self) -> bool {
        self.health.is_healthy()
    }

    /// Drive sessions until `cancel` fires or [`close`](Self::close) is
    /// called.
    ///
    /// Returns an error only when the client is misconfigured or already
    /// running; session failures are logged and retried on the next host. A
    /// closed client returns immediately.
    pub async fn run(&self, cancel: &CancellationToken, registry: SubscriptionRegistry) -> Result<()> {
        if self.module_info.module_name.is_empty() {
            return Err(ClusterError::InvalidConfig(
                "module name must not be empty".to_string(),
            ));
        }
        self.config.validate()?;
        let _running = RunGuard::acquire(&self.running)?;

        let run_cancel = self.shutdown.child_token();
        let _stop_link = run_cancel.clone().drop_guard();
        let parent = cancel.clone();
        let linked = run_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });

        let registry = Arc::new(registry);
        let handshake = Handshake::new(
            self.module_info.clone(),
            self.config_data.clone(),
            registry.requirements(),
            self.config.clone(),
        )
        .with_redaction(self.redaction.clone());

        info!(
            module = %self.module_info.module_name,
            hosts = ?self.balancer.hosts(),
            "Control plane client started"
        );

        while !run_cancel.is_cancelled() {
            match self.run_session(&run_cancel, &handshake, &registry).await {
                Ok(()) => {}
                Err(e) if e.is_cancelled() => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => error!(
                    module = %self.module_info.module_name,
                    error = %e,
                    retry_in = ?self.config.reconnect_delay(),
                    "Control plane session failed"
                ),
            }

            tokio::select! {
                _ = run_cancel.cancelled() => {}
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
        }

        info!(module = %self.module_info.module_name, "Control plane client stopped");
        Ok(())
    }

    /// Cancel [`run`](Self::run). Idempotent.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();
        Ok(())
    }

    async fn run_session(
        &self,
        run_cancel: &CancellationToken,
        handshake: &Handshake,
        registry: &Arc<SubscriptionRegistry>,
    ) -> Result<()> {
        let context = SessionContext::new(self.balancer.next()?);
        let session_cancel = run_cancel.child_token();
        // Stops receivers still working on this session's events.
        let _session_scope = session_cancel.clone().drop_guard();

        info!(
            session_id = %context.session_id,
            host = %context.host,
            "Opening control plane session"
        );

        let session = handshake
            .run(&session_cancel, self.dialer.as_ref(), context, |session| {
                attach_handlers(session, registry, &session_cancel)
            })
            .await?;

        self.health.session_started();
        let result = self.keep_alive(&session_cancel, handshake, &session).await;
        self.health.session_ended();

        let context = session.context();
        if let Err(e) = session.close().await {
            warn!(
                session_id = %context.session_id,
                host = %context.host,
                error = %e,
                "Failed to close control plane connection"
            );
        }
        info!(
            session_id = %context.session_id,
            host = %context.host,
            "Control plane session ended"
        );
        result
    }

    /// Ping until the session fails or `cancel` fires, announcing readiness
    /// once along the way.
    async fn keep_alive(
        &self,
        cancel: &CancellationToken,
        handshake: &Handshake,
        session: &TransportSession,
    ) -> Result<()> {
        let context = session.context();
        let mut ready = self.ready.subscribe();
        let mut announced = false;

        let period = self.config.ping_interval();
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                is_ready = async { ready.wait_for(|ready| *ready).await.is_ok() }, if !announced => {
                    announced = true;
                    if is_ready {
                        match handshake.emit_module_ready(cancel, session).await {
                            Err(e) if e.is_cancelled() => return Ok(()),
                            result => result?,
                        }
                    }
                }
                _ = ticker.tick() => {
                    match session.ping(cancel, self.config.ping_timeout()).await {
                        Ok(()) => {
                            self.health.record_ping(true);
                            debug!(session_id = %context.session_id, host = %context.host, "Ping ok");
                        }
                        Err(e) if e.is_cancelled() => return Ok(()),
                        Err(e) => {
                            self.health.record_ping(false);
                            return Err(e);
                        }
                    }
                }
            }
        }
    }
}

/// Held for the whole of [`ClusterClient::run`].
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(running: &'a AtomicBool) -> Result<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| ClusterError::AlreadyRunning)?;
        Ok(Self(running))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[async_trait]
impl ControlPlaneClient for ClusterClient {
    async fn run(&self, cancel: &CancellationToken, registry: SubscriptionRegistry) -> Result<()> {
        ClusterClient::run(self, cancel, registry).await
    }

    async fn close(&self) -> Result<()> {
        ClusterClient::close(self).await
    }
}

impl HealthCheck for ClusterClient {
    fn name(&self) -> &str {
        "control-plane"
    }

    fn check(&self) -> Result<()> {
        if self.health.is_healthy() {
            Ok(())
        } else {
            Err(ClusterError::Unhealthy("no live control plane session"))
        }
    }
}

fn attach_handlers(
    session: &TransportSession,
    registry: &Arc<SubscriptionRegistry>,
    cancel: &CancellationToken,
) {
    let context = session.context();
    for module_name in registry.required_module_names() {
        session.on(
            &event::module_connected(&module_name),
            Arc::new(HostsHandler {
                module_name,
                registry: registry.clone(),
                context: context.clone(),
            }),
        );
    }
    session.on(
        event::CONFIG_SEND_ROUTES_CHANGED,
        Arc::new(RoutesHandler {
            registry: registry.clone(),
            cancel: cancel.clone(),
            context: context.clone(),
        }),
    );
    session.on(
        event::CONFIG_SEND_CONFIG_CHANGED,
        Arc::new(RemoteConfigHandler {
            registry: registry.clone(),
            cancel: cancel.clone(),
            context: context.clone(),
        }),
    );
}

struct HostsHandler {
    module_name: String,
    registry: Arc<SubscriptionRegistry>,
    context: SessionContext,
}

#[async_trait]
impl EventHandler for HostsHandler {
    async fn handle(&self, payload: Bytes) {
        let hosts = match serde_json::from_slice::<Option<Vec<String>>>(&payload) {
            Ok(hosts) => hosts.unwrap_or_default(),
            Err(e) => {
                error!(
                    session_id = %self.context.session_id,
                    host = %self.context.host,
                    module = %self.module_name,
                    error = %e,
                    "Invalid host list, event dropped"
                );
                return;
            }
        };

        info!(
            session_id = %self.context.session_id,
            host = %self.context.host,
            module = %self.module_name,
            hosts = ?hosts,
            "Dependency hosts changed"
        );
        self.registry.upgrade_hosts(&self.module_name, hosts);
    }
}

struct RoutesHandler {
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
    context: SessionContext,
}

#[async_trait]
impl EventHandler for RoutesHandler {
    async fn handle(&self, payload: Bytes) {
        let routes = match serde_json::from_slice::<RoutingConfig>(&payload) {
            Ok(routes) => routes,
            Err(e) => {
                error!(
                    session_id = %self.context.session_id,
                    host = %self.context.host,
                    error = %e,
                    "Invalid routing config, event dropped"
                );
                return;
            }
        };

        let modules = routes.len();
        match self.registry.receive_routes(&self.cancel, routes).await {
            Ok(()) if !self.registry.has_routes_receiver() => debug!(
                session_id = %self.context.session_id,
                host = %self.context.host,
                modules,
                "Routing config ignored, no receiver"
            ),
            Ok(()) => info!(
                session_id = %self.context.session_id,
                host = %self.context.host,
                modules,
                "Routing config applied"
            ),
            Err(e) => error!(
                session_id = %self.context.session_id,
                host = %self.context.host,
                error = %e,
                "Routes receiver failed"
            ),
        }
    }
}

struct RemoteConfigHandler {
    registry: Arc<SubscriptionRegistry>,
    cancel: CancellationToken,
    context: SessionContext,
}

#[async_trait]
impl EventHandler for RemoteConfigHandler {
    async fn handle(&self, payload: Bytes) {
        match self.registry.apply_remote_config(&self.cancel, payload).await {
            Ok(()) => info!(
                session_id = %self.context.session_id,
                host = %self.context.host,
                "Remote config applied"
            ),
            Err(e) if e.is_cancelled() => debug!(
                session_id = %self.context.session_id,
                host = %self.context.host,
                "Remote config apply abandoned, session ended"
            ),
            Err(e) => error!(
                session_id = %self.context.session_id,
                host = %self.context.host,
                error = %e,
                "Failed to apply remote config"
            ),
        }
    }
}
