//! Active-process map shared by supervision loops, the health monitor and
//! the shutdown coordinator
//!
//! A service name is present iff its supervision loop currently owns a live
//! process. Only the owning loop inserts or removes its entry; other holders
//! read snapshots. Shard locks are released before any await.

use super::ManagedProcess;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Registered process together with the service that owns it
#[derive(Debug, Clone)]
pub struct RegisteredProcess {
    /// Owning service name
    pub service: String,
    /// Shared process handle
    pub process: Arc<dyn ManagedProcess>,
}

/// Concurrent map of service name to its live process
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    entries: Arc<DashMap<String, Arc<dyn ManagedProcess>>>,
}

impl ProcessRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `process` as the live process of `service`
    ///
    /// Returns the handle previously registered under the same name, which
    /// only happens if a stale loop failed to clean up.
    pub fn insert(
        &self,
        service: &str,
        process: Arc<dyn ManagedProcess>,
    ) -> Option<Arc<dyn ManagedProcess>> {
        debug!(target: "trellis::supervisor", "Registering pid {} for '{}'", process.pid(), service);
        self.entries.insert(service.to_string(), process)
    }

    /// Remove the entry for `service` only if it still refers to `pid`
    pub fn remove_if_pid(&self, service: &str, pid: u32) -> bool {
        let removed = self
            .entries
            .remove_if(service, |_, process| process.pid() == pid)
            .is_some();
        if removed {
            debug!(target: "trellis::supervisor", "Unregistered pid {} for '{}'", pid, service);
        }
        removed
    }

    /// Live process of `service`, if any
    pub fn get(&self, service: &str) -> Option<Arc<dyn ManagedProcess>> {
        self.entries.get(service).map(|entry| entry.value().clone())
    }

    /// Whether `service` currently has a registered process
    pub fn contains(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }

    /// Copy of every entry, sorted by service name
    pub fn snapshot(&self) -> Vec<RegisteredProcess> {
        let mut entries: Vec<RegisteredProcess> = self
            .entries
            .iter()
            .map(|entry| RegisteredProcess {
                service: entry.key().clone(),
                process: entry.value().clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.service.cmp(&b.service));
        entries
    }

    /// Number of registered processes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no process is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
