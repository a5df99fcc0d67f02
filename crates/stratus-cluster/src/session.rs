//! One live connection to the control plane
//!
//! `TransportSession` wraps a raw [`EventSocket`] with the behavior every
//! caller needs: payload logging (redacted for config-bearing events), acked
//! emits and pings bounded by a timeout and a cancellation token, and the
//! fan-in of the control plane's side-channel error events so that any wait
//! can be interrupted by `ERROR_CONNECTION` or `ERROR_CONFIG`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use stratus_log::RedactionRules;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{ClusterError, Result};
use crate::event;
use crate::transport::{Dialer, EventHandler, EventSocket};

/// Correlation data attached to every log line of one session.
#[derive(Clone, Debug)]
pub struct SessionContext {
    pub session_id: String,
    pub host: String,
}

impl SessionContext {
    /// New context with a fresh session id.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            host: host.into(),
        }
    }
}

/// A connected event socket plus session-level bookkeeping.
pub struct TransportSession {
    socket: Arc<dyn EventSocket>,
    context: SessionContext,
    redaction: RedactionRules,
    connection_errors: Mutex<mpsc::Receiver<Bytes>>,
    config_errors: Mutex<mpsc::Receiver<Bytes>>,
}

impl TransportSession {
    /// Dial `url`, giving up as soon as `cancel` fires.
    pub async fn dial(
        dialer: &dyn Dialer,
        url: &Url,
        context: SessionContext,
        redaction: RedactionRules,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        info!(
            session_id = %context.session_id,
            host = %context.host,
            url = %url,
            "Dialing control plane"
        );

        let socket = tokio::select! {
            _ = cancel.cancelled() => return Err(ClusterError::Cancelled),
            socket = dialer.dial(url) => socket?,
        };

        Ok(Self::from_socket(socket, context, redaction))
    }

    /// Wrap an already connected socket.
    pub fn from_socket(
        socket: Arc<dyn EventSocket>,
        context: SessionContext,
        redaction: RedactionRules,
    ) -> Self {
        // Capacity 1: a second error while one is pending is dropped, the
        // first one already terminates whatever wait consumes it.
        let (connection_tx, connection_rx) = mpsc::channel(1);
        let (config_tx, config_rx) = mpsc::channel(1);

        socket.on(
            event::ERROR_CONNECTION,
            Arc::new(ErrorForwarder {
                event: event::ERROR_CONNECTION,
                tx: connection_tx,
                context: context.clone(),
            }),
        );
        socket.on(
            event::ERROR_CONFIG,
            Arc::new(ErrorForwarder {
                event: event::ERROR_CONFIG,
                tx: config_tx,
                context: context.clone(),
            }),
        );

        Self {
            socket,
            context,
            redaction,
            connection_errors: Mutex::new(connection_rx),
            config_errors: Mutex::new(config_rx),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.context
    }

    /// Subscribe to an inbound event. Every payload is logged before the
    /// handler runs.
    pub fn on(&self, event: &str, handler: Arc<dyn EventHandler>) {
        self.socket.on(
            event,
            Arc::new(LoggedHandler {
                event: event.to_string(),
                inner: handler,
                context: self.context.clone(),
                redaction: self.redaction.clone(),
            }),
        );
    }

    /// Emit `payload` and wait for its acknowledgment.
    pub async fn emit_with_ack(
        &self,
        cancel: &CancellationToken,
        event: &'static str,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes> {
        debug!(
            session_id = %self.context.session_id,
            host = %self.context.host,
            event,
            payload = %loggable(&self.redaction, event, &payload),
            "Sending event"
        );

        let ack = self
            .await_result(
                cancel,
                event,
                timeout,
                self.socket.emit_with_ack(event, payload),
            )
            .await?;

        debug!(
            session_id = %self.context.session_id,
            host = %self.context.host,
            event,
            ack = %String::from_utf8_lossy(&ack),
            "Event acknowledged"
        );
        Ok(ack)
    }

    /// Serialize `value` as JSON and emit it with acknowledgment.
    pub async fn emit_json<T: Serialize + ?Sized>(
        &self,
        cancel: &CancellationToken,
        event: &'static str,
        value: &T,
        timeout: Duration,
    ) -> Result<Bytes> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        self.emit_with_ack(cancel, event, payload, timeout).await
    }

    pub async fn ping(&self, cancel: &CancellationToken, timeout: Duration) -> Result<()> {
        self.await_result(cancel, "ping", timeout, self.socket.ping())
            .await
    }

    /// Race `operation` against cancellation, the side-channel error events
    /// and `timeout`, returning whichever finishes first.
    pub async fn await_result<T, F>(
        &self,
        cancel: &CancellationToken,
        operation: &'static str,
        timeout: Duration,
        operation_future: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClusterError::Cancelled),
            Some(message) = next_error(&self.connection_errors) => Err(ClusterError::Remote {
                event: event::ERROR_CONNECTION.to_string(),
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            Some(message) = next_error(&self.config_errors) => Err(ClusterError::Remote {
                event: event::ERROR_CONFIG.to_string(),
                message: String::from_utf8_lossy(&message).into_owned(),
            }),
            result = tokio::time::timeout(timeout, operation_future) => match result {
                Ok(result) => result,
                Err(_) => Err(ClusterError::Timeout { operation, timeout }),
            },
        }
    }

    pub async fn close(&self) -> Result<()> {
        if self.socket.is_closed() {
            return Ok(());
        }
        self.socket.close().await?;
        info!(
            session_id = %self.context.session_id,
            host = %self.context.host,
            "Control plane connection closed"
        );
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }
}

async fn next_error(rx: &Mutex<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    rx.lock().await.recv().await
}

fn loggable(redaction: &RedactionRules, event: &str, payload: &[u8]) -> String {
    if event::is_config_bearing(event) {
        redaction.redact_for_log(payload)
    } else {
        String::from_utf8_lossy(payload).into_owned()
    }
}

struct LoggedHandler {
    event: String,
    inner: Arc<dyn EventHandler>,
    context: SessionContext,
    redaction: RedactionRules,
}

#[async_trait]
impl EventHandler for LoggedHandler {
    async fn handle(&self, payload: Bytes) {
        debug!(
            session_id = %self.context.session_id,
            host = %self.context.host,
            event = %self.event,
            payload = %loggable(&self.redaction, &self.event, &payload),
            "Received event"
        );
        self.inner.handle(payload).await;
    }
}

struct ErrorForwarder {
    event: &'static str,
    tx: mpsc::Sender<Bytes>,
    context: SessionContext,
}

#[async_trait]
impl EventHandler for ErrorForwarder {
    async fn handle(&self, payload: Bytes) {
        error!(
            session_id = %self.context.session_id,
            host = %self.context.host,
            event = self.event,
            message = %String::from_utf8_lossy(&payload),
            "Control plane reported a session error"
        );
        if self.tx.try_send(payload).is_err() {
            warn!(
                session_id = %self.context.session_id,
                event = self.event,
                "Session error dropped, one is already pending"
            );
        }
    }
}
