//! Round-robin host rotation

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::error::{ClusterError, Result};
use crate::registry::HostsUpgrader;

/// Thread-safe round-robin selector over a replaceable host list.
///
/// Also usable as the [`HostsUpgrader`] of a required module, so the host
/// list pushed by the control plane feeds the balancer directly.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    hosts: RwLock<Vec<String>>,
    cursor: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: RwLock::new(hosts),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next host in rotation.
    pub fn next(&self) -> Result<String> {
        let hosts = self.hosts.read();
        if hosts.is_empty() {
            return Err(ClusterError::NoHosts);
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % hosts.len();
        Ok(hosts[index].clone())
    }

    /// Replace the host list. Rotation restarts from the first host.
    pub fn upgrade(&self, hosts: Vec<String>) {
        let mut current = self.hosts.write();
        *current = hosts;
        self.cursor.store(0, Ordering::Relaxed);
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.read().clone()
    }
}

impl HostsUpgrader for RoundRobinBalancer {
    fn upgrade(&self, hosts: Vec<String>) {
        RoundRobinBalancer::upgrade(self, hosts);
    }
}
