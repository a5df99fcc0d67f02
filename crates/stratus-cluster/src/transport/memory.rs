//! In-process transport with a scriptable control plane
//!
//! `MemoryControlPlane` implements [`Dialer`] without any network I/O. It
//! records every dial and emitted frame, acknowledges frames according to a
//! per-event [`AckBehavior`]. It can push inbound events, fail or stall
//! pings, refuse or stall dials, and drop the active connection. It backs the
//! crate's tests and lets a service run its control-plane wiring locally.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::{Dialer, EventHandler, EventSocket, url_authority};
use crate::error::{ClusterError, Result};

/// How the control plane answers an acked emit.
#[derive(Clone, Debug)]
pub enum AckBehavior {
    /// Acknowledge with this payload
    Ack(Bytes),
    /// Fail the emit with a transport error
    Reject(String),
    /// Never answer
    Hang,
}

impl Default for AckBehavior {
    fn default() -> Self {
        AckBehavior::Ack(Bytes::from_static(b"ok"))
    }
}

/// A frame emitted by a client.
#[derive(Clone, Debug)]
pub struct EmittedFrame {
    pub host: String,
    pub event: String,
    pub payload: Bytes,
}

impl EmittedFrame {
    /// Decode the payload as JSON.
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}

#[derive(Default)]
struct PlaneState {
    dials: Mutex<Vec<String>>,
    unreachable: Mutex<HashSet<String>>,
    acks: DashMap<String, AckBehavior>,
    emitted: Mutex<Vec<EmittedFrame>>,
    sockets: Mutex<Vec<Arc<MemorySocket>>>,
    open: AtomicUsize,
    max_open: AtomicUsize,
    fail_pings: AtomicBool,
    hang_pings: AtomicBool,
    hang_dials: AtomicBool,
    pings: AtomicUsize,
    changed: Notify,
}

impl PlaneState {
    fn notify(&self) {
        self.changed.notify_waiters();
    }
}

/// Scriptable in-process control plane.
#[derive(Clone, Default)]
pub struct MemoryControlPlane {
    state: Arc<PlaneState>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (or stop refusing) dials to `host`.
    pub fn set_unreachable(&self, host: &str, unreachable: bool) {
        let mut hosts = self.state.unreachable.lock();
        if unreachable {
            hosts.insert(host.to_string());
        } else {
            hosts.remove(host);
        }
    }

    /// Answer future emits of `event` with `behavior`.
    pub fn set_ack(&self, event: &str, behavior: AckBehavior) {
        self.state.acks.insert(event.to_string(), behavior);
    }

    /// Make every ping fail until switched back.
    pub fn fail_pings(&self, fail: bool) {
        self.state.fail_pings.store(fail, Ordering::SeqCst);
    }

    /// Make every ping wait forever until switched back.
    pub fn hang_pings(&self, hang: bool) {
        self.state.hang_pings.store(hang, Ordering::SeqCst);
    }

    /// Make every dial to a reachable host wait forever until switched back.
    pub fn hang_dials(&self, hang: bool) {
        self.state.hang_dials.store(hang, Ordering::SeqCst);
    }

    /// Pings received on open connections.
    pub fn pings(&self) -> usize {
        self.state.pings.load(Ordering::SeqCst)
    }

    /// Hosts in dial order, including refused dials.
    pub fn dialed_hosts(&self) -> Vec<String> {
        self.state.dials.lock().clone()
    }

    /// Frames emitted with the given event name, oldest first.
    pub fn emitted(&self, event: &str) -> Vec<EmittedFrame> {
        self.state
            .emitted
            .lock()
            .iter()
            .filter(|frame| frame.event == event)
            .cloned()
            .collect()
    }

    /// Every emitted event name, oldest first.
    pub fn emitted_events(&self) -> Vec<String> {
        self.state
            .emitted
            .lock()
            .iter()
            .map(|frame| frame.event.clone())
            .collect()
    }

    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously open connections seen so far.
    pub fn max_open_connections(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    /// The most recently dialed connection that is still open.
    pub fn active_socket(&self) -> Option<Arc<MemorySocket>> {
        self.state
            .sockets
            .lock()
            .iter()
            .rev()
            .find(|socket| !socket.is_closed())
            .cloned()
    }

    /// Push an inbound event to the active connection.
    ///
    /// Returns the handle of the dispatch task, or `None` when there is no
    /// open connection or it has no handler for `event`.
    pub fn push(&self, event: &str, payload: impl Into<Bytes>) -> Option<JoinHandle<()>> {
        self.active_socket()?.deliver(event, payload.into())
    }

    /// Close the active connection from the control plane's side.
    pub fn drop_active_connection(&self) -> bool {
        match self.active_socket() {
            Some(socket) => {
                socket.shutdown();
                true
            }
            None => false,
        }
    }

    /// Wait until at least `count` frames with `event` were emitted.
    pub async fn wait_for_emitted(&self, event: &str, count: usize) {
        self.wait_until(|plane| plane.emitted(event).len() >= count)
            .await
    }

    /// Wait until at least `count` dials were attempted.
    pub async fn wait_for_dials(&self, count: usize) {
        self.wait_until(|plane| plane.dialed_hosts().len() >= count)
            .await
    }

    /// Wait until at least `count` pings were received.
    pub async fn wait_for_pings(&self, count: usize) {
        self.wait_until(|plane| plane.pings() >= count).await
    }

    async fn wait_until<F>(&self, condition: F)
    where
        F: Fn(&MemoryControlPlane) -> bool,
    {
        loop {
            let notified = self.state.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if condition(self) {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Dialer for MemoryControlPlane {
    async fn dial(&self, url: &Url) -> Result<Arc<dyn EventSocket>> {
        let host = url_authority(url);
        let module_name = url
            .query_pairs()
            .find(|(key, _)| key == "module_name")
            .map(|(_, value)| value.into_owned())
            .unwrap_or_default();

        self.state.dials.lock().push(host.clone());
        let refused = self.state.unreachable.lock().contains(&host);
        if refused {
            self.state.notify();
            return Err(ClusterError::Transport(format!(
                "dial {}: connection refused",
                url
            )));
        }
        if self.state.hang_dials.load(Ordering::SeqCst) {
            self.state.notify();
            return futures::future::pending().await;
        }

        let socket = Arc::new(MemorySocket {
            host,
            module_name,
            handlers: DashMap::new(),
            closed: AtomicBool::new(false),
            state: self.state.clone(),
        });
        let open = self.state.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_open.fetch_max(open, Ordering::SeqCst);
        self.state.sockets.lock().push(socket.clone());
        self.state.notify();

        debug!(host = %socket.host, module = %socket.module_name, "Memory connection opened");
        Ok(socket)
    }
}

/// Client side of an in-process connection.
pub struct MemorySocket {
    host: String,
    module_name: String,
    handlers: DashMap<String, Arc<dyn EventHandler>>,
    closed: AtomicBool,
    state: Arc<PlaneState>,
}

impl MemorySocket {
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Module name announced in the connection URL.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    pub fn has_handler(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    /// Dispatch an inbound event on its own task.
    pub fn deliver(&self, event: &str, payload: Bytes) -> Option<JoinHandle<()>> {
        let handler = self.handlers.get(event).map(|h| h.value().clone())?;
        Some(tokio::spawn(async move {
            handler.handle(payload).await;
        }))
    }

    fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.open.fetch_sub(1, Ordering::SeqCst);
        self.state.notify();
        true
    }
}

#[async_trait]
impl EventSocket for MemorySocket {
    fn on(&self, event: &str, handler: Arc<dyn EventHandler>) {
        self.handlers.insert(event.to_string(), handler);
    }

    async fn emit_with_ack(&self, event: &str, payload: Bytes) -> Result<Bytes> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }

        self.state.emitted.lock().push(EmittedFrame {
            host: self.host.clone(),
            event: event.to_string(),
            payload,
        });
        self.state.notify();

        let behavior = self
            .state
            .acks
            .get(event)
            .map(|b| b.value().clone())
            .unwrap_or_default();
        match behavior {
            AckBehavior::Ack(ack) => Ok(ack),
            AckBehavior::Reject(message) => Err(ClusterError::Transport(message)),
            AckBehavior::Hang => futures::future::pending().await,
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.is_closed() {
            return Err(ClusterError::Closed);
        }
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        self.state.notify();
        if self.state.hang_pings.load(Ordering::SeqCst) {
            return futures::future::pending().await;
        }
        if self.state.fail_pings.load(Ordering::SeqCst) {
            return Err(ClusterError::Transport("ping: no pong received".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.shutdown() {
            debug!(host = %self.host, "Memory connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::connection_url;

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl EventHandler for Counter {
        async fn handle(&self, _payload: Bytes) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn url(host: &str) -> Url {
        connection_url("ws", host, "/isp-etp/", "billing").unwrap()
    }

    #[tokio::test]
    async fn test_dial_records_host_and_module() {
        let plane = MemoryControlPlane::new();
        let socket = plane.dial(&url("10.0.0.1:9001")).await.unwrap();

        assert_eq!(plane.dialed_hosts(), vec!["10.0.0.1:9001"]);
        assert_eq!(plane.open_connections(), 1);
        let active = plane.active_socket().unwrap();
        assert_eq!(active.module_name(), "billing");

        socket.close().await.unwrap();
        socket.close().await.unwrap();
        assert_eq!(plane.open_connections(), 0);
        assert_eq!(plane.max_open_connections(), 1);
        assert!(plane.active_socket().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_refused() {
        let plane = MemoryControlPlane::new();
        plane.set_unreachable("10.0.0.1:9001", true);

        let err = plane.dial(&url("10.0.0.1:9001")).await.err().unwrap();
        assert!(matches!(err, ClusterError::Transport(_)));
        assert_eq!(plane.dialed_hosts().len(), 1);
        assert_eq!(plane.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_ack_behaviors() {
        let plane = MemoryControlPlane::new();
        let socket = plane.dial(&url("10.0.0.1:9001")).await.unwrap();

        let ack = socket.emit_with_ack("A", Bytes::from_static(b"{}")).await.unwrap();
        assert_eq!(ack, Bytes::from_static(b"ok"));

        plane.set_ack("B", AckBehavior::Reject("invalid schema".to_string()));
        assert!(socket.emit_with_ack("B", Bytes::new()).await.is_err());

        assert_eq!(plane.emitted_events(), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_push_dispatches_to_handler() {
        let plane = MemoryControlPlane::new();
        let socket = plane.dial(&url("10.0.0.1:9001")).await.unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        socket.on("EVT", Arc::new(Counter(count.clone())));

        plane.push("EVT", "x").unwrap().await.unwrap();
        assert!(plane.push("OTHER", "x").is_none());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_dial_and_ping() {
        let plane = MemoryControlPlane::new();
        plane.hang_dials(true);
        let dial = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            plane.dial(&url("10.0.0.1:9001")),
        )
        .await;
        assert!(dial.is_err());
        assert_eq!(plane.dialed_hosts().len(), 1);
        assert_eq!(plane.open_connections(), 0);

        plane.hang_dials(false);
        let socket = plane.dial(&url("10.0.0.1:9001")).await.unwrap();
        plane.hang_pings(true);
        let ping = tokio::time::timeout(std::time::Duration::from_secs(5), socket.ping()).await;
        assert!(ping.is_err());
        assert_eq!(plane.pings(), 1);
    }

    #[tokio::test]
    async fn test_drop_active_connection_fails_ping() {
        let plane = MemoryControlPlane::new();
        let socket = plane.dial(&url("10.0.0.1:9001")).await.unwrap();
        assert!(socket.ping().await.is_ok());

        assert!(plane.drop_active_connection());
        assert!(matches!(socket.ping().await, Err(ClusterError::Closed)));
        assert!(!plane.drop_active_connection());
    }
}
