// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Tracks connected workers: their persisted state plus the transient
//! routing handle used to reach them.

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;

use crate::clock::Clock;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::protocol::ServerMessage;
use crate::store::{Counter, StateStore};
#[cfg(test)]
use crate::store::InMemoryStateStore;
use crate::types::{Load, Worker, WorkerId, WorkerStatus};
use std::sync::Arc;

/// A worker's live connection, opaque to every component but C3.
pub type RoutingHandle = UnboundedSender<ServerMessage>;

/// Connected-worker directory: persisted entities plus routing handles.
///
/// Routing handles are never persisted — only this registry holds them,
/// matching the rule that transport state doesn't survive a restart.
pub struct WorkerRegistry {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    handles: DashMap<WorkerId, RoutingHandle>,
    hostnames: DashMap<String, WorkerId>,
    inactive_timeout: chrono::Duration,
}

impl WorkerRegistry {
    /// Build a registry over a shared store and clock.
    pub fn new(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>, inactive_timeout: chrono::Duration) -> Self {
        Self {
            store,
            clock,
            handles: DashMap::new(),
            hostnames: DashMap::new(),
            inactive_timeout,
        }
    }

    /// Register a new connection for `hostname`, superseding any prior
    /// Worker under the same hostname.
    pub fn register(&self, hostname: String, handle: RoutingHandle) -> WorkerId {
        if let Some((_, prior_id)) = self.hostnames.remove(&hostname) {
            self.store.delete_worker(prior_id);
            self.handles.remove(&prior_id);
        }

        let id = WorkerId(self.store.incr(Counter::Worker));
        let now = self.clock.now();
        self.store.put_worker(Worker {
            id,
            hostname: hostname.clone(),
            status: WorkerStatus::Active,
            load: Load::default(),
            last_heartbeat: now,
            registered_at: now,
        });
        self.hostnames.insert(hostname, id);
        self.handles.insert(id, handle);
        id
    }

    /// Refresh a worker's status, load and heartbeat timestamp.
    pub fn update_status(&self, worker_id: WorkerId, status: WorkerStatus, load: Load) -> OrchestratorResult<()> {
        let now = self.clock.now();
        self.store
            .update_worker(
                worker_id,
                Box::new(move |w| {
                    w.status = status;
                    w.load = load;
                    w.last_heartbeat = now;
                }),
            )
            .map_err(|_| OrchestratorError::WorkerNotFound(worker_id.0))
    }

    /// Remove a Worker entirely, e.g. on transport disconnect.
    pub fn detach(&self, worker_id: WorkerId) {
        if let Some(worker) = self.store.get_worker(worker_id) {
            self.hostnames.remove(&worker.hostname);
        }
        self.store.delete_worker(worker_id);
        self.handles.remove(&worker_id);
    }

    /// Remove every Worker whose heartbeat has gone stale.
    ///
    /// Returns the ids removed, for callers that want to log the sweep.
    pub fn sweep(&self) -> Vec<WorkerId> {
        let now = self.clock.now();
        let mut removed = Vec::new();
        for worker in self.store.all_workers() {
            let stale = !worker.is_healthy(now, self.inactive_timeout)
                || worker.status == WorkerStatus::Inactive;
            if stale {
                self.detach(worker.id);
                removed.push(worker.id);
            }
        }
        removed
    }

    /// Deliver `message` to `worker_id`'s live connection.
    pub fn route_to(&self, worker_id: WorkerId, message: ServerMessage) -> OrchestratorResult<()> {
        let handle = self
            .handles
            .get(&worker_id)
            .ok_or_else(|| OrchestratorError::WorkerUnreachable(worker_id.to_string()))?;
        handle
            .send(message)
            .map_err(|_| OrchestratorError::WorkerUnreachable(worker_id.to_string()))
    }

    /// Fetch the persisted Worker entity.
    pub fn get(&self, worker_id: WorkerId) -> Option<Worker> {
        self.store.get_worker(worker_id)
    }

    /// All known workers, freshest heartbeat first.
    pub fn all_sorted_by_freshness(&self) -> Vec<Worker> {
        let mut workers = self.store.all_workers();
        workers.sort_by(|a, b| b.last_heartbeat.cmp(&a.last_heartbeat));
        workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::Utc;
    use tokio::sync::mpsc::unbounded_channel;

    fn registry() -> (WorkerRegistry, Arc<FakeClock>) {
        let store = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let registry = WorkerRegistry::new(store, clock.clone(), chrono::Duration::seconds(120));
        (registry, clock)
    }

    #[test]
    fn test_register_assigns_monotonic_ids() {
        let (registry, _clock) = registry();
        let (tx_a, _rx_a) = unbounded_channel();
        let (tx_b, _rx_b) = unbounded_channel();

        let id_a = registry.register("host-a".to_string(), tx_a);
        let id_b = registry.register("host-b".to_string(), tx_b);

        assert_eq!(id_a, WorkerId(1));
        assert_eq!(id_b, WorkerId(2));
    }

    #[test]
    fn test_reconnect_purges_prior_worker_s4() {
        let (registry, _clock) = registry();
        let (tx1, _rx1) = unbounded_channel();
        let id1 = registry.register("host-a".to_string(), tx1);
        assert_eq!(id1, WorkerId(1));

        let (tx2, _rx2) = unbounded_channel();
        let id2 = registry.register("host-a".to_string(), tx2);
        assert_eq!(id2, WorkerId(2));

        assert!(registry.get(WorkerId(1)).is_none());
        assert!(registry.get(WorkerId(2)).is_some());
    }

    #[test]
    fn test_update_status_unknown_worker_errors() {
        let (registry, _clock) = registry();
        let result = registry.update_status(WorkerId(99), WorkerStatus::Busy, Load::default());
        assert!(matches!(result, Err(OrchestratorError::WorkerNotFound(99))));
    }

    #[test]
    fn test_route_to_missing_handle_is_worker_unreachable() {
        let (registry, _clock) = registry();
        let result = registry.route_to(WorkerId(1), ServerMessage::Error {
            message: "x".to_string(),
        });
        assert!(matches!(result, Err(OrchestratorError::WorkerUnreachable(_))));
    }

    #[test]
    fn test_sweep_removes_stale_workers() {
        let (registry, clock) = registry();
        let (tx, _rx) = unbounded_channel();
        let id = registry.register("host-a".to_string(), tx);

        clock.advance(chrono::Duration::seconds(300));
        let removed = registry.sweep();

        assert_eq!(removed, vec![id]);
        assert!(registry.get(id).is_none());
    }

    #[test]
    fn test_sweep_keeps_fresh_workers() {
        let (registry, clock) = registry();
        let (tx, _rx) = unbounded_channel();
        let id = registry.register("host-a".to_string(), tx);

        clock.advance(chrono::Duration::seconds(10));
        let removed = registry.sweep();

        assert!(removed.is_empty());
        assert!(registry.get(id).is_some());
    }
}
