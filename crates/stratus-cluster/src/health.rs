//! Health-check capability
//!
//! Services register implementors with whatever health registry they expose;
//! this crate only reports its own state through [`HealthCheck`].

use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Result;

/// A named component that can report whether it is healthy.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(())` when healthy, otherwise the reason it is not.
    fn check(&self) -> Result<()>;
}

/// Liveness of the current control-plane session.
#[derive(Debug, Default)]
pub(crate) struct SessionHealth {
    alive: AtomicBool,
    last_ping_ok: AtomicBool,
}

impl SessionHealth {
    pub(crate) fn session_started(&self) {
        self.last_ping_ok.store(true, Ordering::SeqCst);
        self.alive.store(true, Ordering::SeqCst);
    }

    pub(crate) fn session_ended(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub(crate) fn record_ping(&self, ok: bool) {
        self.last_ping_ok.store(ok, Ordering::SeqCst);
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && self.last_ping_ok.load(Ordering::SeqCst)
    }
}
