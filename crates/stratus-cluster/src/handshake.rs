//! Registration handshake
//!
//! A fresh session is registered by announcing the module's config schema and
//! then its requirements, each acknowledged by the control plane. Readiness is
//! announced separately, once the module has finished its own startup.

use std::sync::Arc;

use stratus_log::RedactionRules;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ClusterClientConfig;
use crate::error::Result;
use crate::event;
use crate::model::{BackendDeclaration, ConfigData, ModuleDependency, ModuleInfo, ModuleRequirements};
use crate::session::{SessionContext, TransportSession};
use crate::transport::{Dialer, connection_url};

/// Parameters of the registration exchange. Holds no per-session state.
#[derive(Clone, Debug)]
pub struct Handshake {
    module_info: Arc<ModuleInfo>,
    config_data: Arc<ConfigData>,
    requirements: ModuleRequirements,
    config: Arc<ClusterClientConfig>,
    redaction: RedactionRules,
}

impl Handshake {
    pub fn new(
        module_info: Arc<ModuleInfo>,
        config_data: Arc<ConfigData>,
        requirements: ModuleRequirements,
        config: Arc<ClusterClientConfig>,
    ) -> Self {
        Self {
            module_info,
            config_data,
            requirements,
            config,
            redaction: RedactionRules::default(),
        }
    }

    /// Rules used to redact config payloads in session logs.
    pub fn with_redaction(mut self, redaction: RedactionRules) -> Self {
        self.redaction = redaction;
        self
    }

    pub fn requirements(&self) -> &ModuleRequirements {
        &self.requirements
    }

    /// Dial `context.host` and register the module.
    ///
    /// `attach` runs on the dialed session before the first handshake frame,
    /// so handlers are in place for events pushed right after registration.
    /// On failure the half-open connection is closed.
    pub async fn run<F>(
        &self,
        cancel: &CancellationToken,
        dialer: &dyn Dialer,
        context: SessionContext,
        attach: F,
    ) -> Result<TransportSession>
    where
        F: FnOnce(&TransportSession),
    {
        let url = connection_url(
            &self.config.scheme,
            &context.host,
            &self.config.path,
            &self.module_info.module_name,
        )?;
        let session =
            TransportSession::dial(dialer, &url, context, self.redaction.clone(), cancel).await?;
        attach(&session);

        if let Err(e) = self.register(cancel, &session).await {
            if let Err(close_err) = session.close().await {
                warn!(
                    session_id = %session.context().session_id,
                    error = %close_err,
                    "Failed to close connection after handshake failure"
                );
            }
            return Err(e);
        }

        info!(
            session_id = %session.context().session_id,
            host = %session.context().host,
            module = %self.module_info.module_name,
            required_modules = ?self.requirements.required_modules,
            require_routes = self.requirements.require_routes,
            "Registered with control plane"
        );
        Ok(session)
    }

    async fn register(&self, cancel: &CancellationToken, session: &TransportSession) -> Result<()> {
        let timeout = self.config.ack_timeout();
        session
            .emit_json(
                cancel,
                event::MODULE_SEND_CONFIG_SCHEMA,
                self.config_data.as_ref(),
                timeout,
            )
            .await?;
        session
            .emit_json(
                cancel,
                event::MODULE_SEND_REQUIREMENTS,
                &self.requirements,
                timeout,
            )
            .await?;
        Ok(())
    }

    /// Self-description announced with `MODULE:READY`.
    pub fn backend_declaration(&self) -> BackendDeclaration {
        let info = &self.module_info;
        BackendDeclaration {
            module_name: info.module_name.clone(),
            version: info.module_version.clone(),
            lib_version: info.lib_version.clone(),
            transport: info.transport.clone(),
            endpoints: info.endpoints.clone(),
            required_modules: self
                .requirements
                .required_modules
                .iter()
                .map(|name| ModuleDependency {
                    name: name.clone(),
                    required: true,
                })
                .collect(),
            address: info.address.clone(),
            metrics_autodiscovery: info.metrics_autodiscovery.clone(),
        }
    }

    /// Announce that the module is ready to receive traffic.
    pub async fn emit_module_ready(
        &self,
        cancel: &CancellationToken,
        session: &TransportSession,
    ) -> Result<()> {
        session
            .emit_json(
                cancel,
                event::MODULE_READY,
                &self.backend_declaration(),
                self.config.ack_timeout(),
            )
            .await?;
        info!(
            session_id = %session.context().session_id,
            host = %session.context().host,
            module = %self.module_info.module_name,
            "Module ready announced"
        );
        Ok(())
    }
}
