//! Event-socket transport boundary
//!
//! The control plane speaks a bidirectional event socket: frames are keyed by
//! an event name and carry a byte payload. Dialing, framing, per-event
//! dispatch and request/ack correlation belong to the transport
//! implementation; this crate only drives it through the traits below.
//!
//! Implementations must dispatch every inbound event on its own task, so
//! handlers may run concurrently with each other and with outbound calls.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::Result;

/// Callback for one inbound event name.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, payload: Bytes);
}

/// One live connection to the control plane.
///
/// Outbound futures must be cancel-safe: callers race them against timeouts
/// and cancellation and drop them when they lose.
#[async_trait]
pub trait EventSocket: Send + Sync + 'static {
    /// Register the handler for `event`, replacing any previous handler.
    fn on(&self, event: &str, handler: Arc<dyn EventHandler>);

    /// Emit an event and wait for the peer's acknowledgment payload.
    async fn emit_with_ack(&self, event: &str, payload: Bytes) -> Result<Bytes>;

    /// Round-trip a liveness ping.
    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// Opens event sockets.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, url: &Url) -> Result<Arc<dyn EventSocket>>;
}

/// Build the control-plane connection target, e.g.
/// `ws://10.0.0.5:9001/isp-etp/?module_name=billing`.
pub fn connection_url(scheme: &str, host: &str, path: &str, module_name: &str) -> Result<Url> {
    let base = format!("{}://{}{}", scheme, host, path);
    Ok(Url::parse_with_params(&base, &[("module_name", module_name)])?)
}

/// `host[:port]` part of a connection URL.
pub fn url_authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_url() {
        let url = connection_url("ws", "10.0.0.5:9001", "/isp-etp/", "billing").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://10.0.0.5:9001/isp-etp/?module_name=billing"
        );
        assert_eq!(url_authority(&url), "10.0.0.5:9001");
    }

    #[test]
    fn test_connection_url_encodes_module_name() {
        let url = connection_url("ws", "cp.local", "/isp-etp/", "billing api&v2").unwrap();
        assert_eq!(
            url.as_str(),
            "ws://cp.local/isp-etp/?module_name=billing+api%26v2"
        );
        assert_eq!(url_authority(&url), "cp.local");
    }

    #[test]
    fn test_connection_url_invalid_host() {
        assert!(connection_url("ws", "bad host:xx", "/isp-etp/", "billing").is_err());
    }
}
