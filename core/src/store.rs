// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! State store: counters, entities and sets, behind a trait so the
//! in-process backend can be swapped for a persistent one without
//! touching callers.
//!
//! Key schema mirrors a key-value backing store even though the only
//! implementation here is in-process:
//!
//! - `counter:worker|deployment|replica` — monotonic id counters
//! - `worker:{id}`, `deployment:{id}`, `replica:{id}` — entities
//! - `workers`, `deployments`, `deployment:{id}:replicas` — id sets

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

use crate::types::{Deployment, DeploymentId, Replica, ReplicaId, Worker, WorkerId};

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entity exists under the given key.
    #[error("no such key: {0}")]
    NotFound(String),
}

/// One of the three monotonic id counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    /// `counter:worker`
    Worker,
    /// `counter:deployment`
    Deployment,
    /// `counter:replica`
    Replica,
}

/// Backing store for all orchestrator state.
///
/// Every method is synchronous: callers already hold an async context
/// (the axum handlers, the worker-transport tasks, the scaling ticker)
/// and the store itself only ever does in-memory lock work, so there is
/// nothing to `.await` on. The mutating `update_*` methods take a boxed
/// closure rather than a generic one so the trait stays object-safe and
/// callers can hold it as `Arc<dyn StateStore>`, the same way drivers
/// are held as `Arc<dyn RepoDriver>`.
pub trait StateStore: Send + Sync {
    /// Atomically increment and return the next id for `counter`.
    fn incr(&self, counter: Counter) -> u64;

    // -- workers -----------------------------------------------------

    /// Insert or replace a worker entity.
    fn put_worker(&self, worker: Worker);
    /// Fetch a worker by id.
    fn get_worker(&self, id: WorkerId) -> Option<Worker>;
    /// Remove a worker entity and its membership in `workers`.
    fn delete_worker(&self, id: WorkerId);
    /// All worker ids currently tracked (the `workers` set).
    fn worker_ids(&self) -> Vec<WorkerId>;
    /// All worker entities currently tracked.
    fn all_workers(&self) -> Vec<Worker>;
    /// Mutate a worker in place, returning `NotFound` if it doesn't exist.
    fn update_worker(&self, id: WorkerId, f: Box<dyn FnOnce(&mut Worker) + Send>) -> Result<(), StoreError>;

    // -- deployments ---------------------------------------------------

    /// Insert or replace a deployment entity.
    fn put_deployment(&self, deployment: Deployment);
    /// Fetch a deployment by id.
    fn get_deployment(&self, id: DeploymentId) -> Option<Deployment>;
    /// All deployment ids currently tracked (the `deployments` set).
    fn deployment_ids(&self) -> Vec<DeploymentId>;
    /// All deployment entities currently tracked.
    fn all_deployments(&self) -> Vec<Deployment>;
    /// Mutate a deployment in place, returning `NotFound` if it doesn't exist.
    fn update_deployment(&self, id: DeploymentId, f: Box<dyn FnOnce(&mut Deployment) + Send>) -> Result<(), StoreError>;

    // -- replicas ------------------------------------------------------

    /// Insert or replace a replica entity and add it to
    /// `deployment:{id}:replicas`.
    fn put_replica(&self, replica: Replica);
    /// Fetch a replica by id.
    fn get_replica(&self, id: ReplicaId) -> Option<Replica>;
    /// Remove a replica entity and its membership in its deployment's set.
    fn delete_replica(&self, id: ReplicaId);
    /// All replica ids belonging to `deployment_id`.
    fn replica_ids_for(&self, deployment_id: DeploymentId) -> Vec<ReplicaId>;
    /// All replica entities belonging to `deployment_id`, sorted by
    /// `replica_number` ascending.
    fn replicas_for(&self, deployment_id: DeploymentId) -> Vec<Replica>;
    /// Mutate a replica in place, returning `NotFound` if it doesn't exist.
    fn update_replica(&self, id: ReplicaId, f: Box<dyn FnOnce(&mut Replica) + Send>) -> Result<(), StoreError>;
}

/// In-process `StateStore`: `DashMap`s for entities, `parking_lot`
/// `RwLock`-guarded sets for deployment→replica membership, and plain
/// atomics for the id counters.
pub struct InMemoryStateStore {
    workers: DashMap<WorkerId, Worker>,
    deployments: DashMap<DeploymentId, Deployment>,
    replicas: DashMap<ReplicaId, Replica>,
    deployment_replicas: DashMap<DeploymentId, RwLock<HashSet<ReplicaId>>>,
    worker_counter: AtomicU64,
    deployment_counter: AtomicU64,
    replica_counter: AtomicU64,
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStateStore {
    /// An empty store with all counters at zero.
    pub fn new() -> Self {
        Self {
            workers: DashMap::new(),
            deployments: DashMap::new(),
            replicas: DashMap::new(),
            deployment_replicas: DashMap::new(),
            worker_counter: AtomicU64::new(0),
            deployment_counter: AtomicU64::new(0),
            replica_counter: AtomicU64::new(0),
        }
    }
}

impl StateStore for InMemoryStateStore {
    fn incr(&self, counter: Counter) -> u64 {
        let atomic = match counter {
            Counter::Worker => &self.worker_counter,
            Counter::Deployment => &self.deployment_counter,
            Counter::Replica => &self.replica_counter,
        };
        atomic.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn put_worker(&self, worker: Worker) {
        self.workers.insert(worker.id, worker);
    }

    fn get_worker(&self, id: WorkerId) -> Option<Worker> {
        self.workers.get(&id).map(|w| w.clone())
    }

    fn delete_worker(&self, id: WorkerId) {
        self.workers.remove(&id);
    }

    fn worker_ids(&self) -> Vec<WorkerId> {
        self.workers.iter().map(|e| *e.key()).collect()
    }

    fn all_workers(&self) -> Vec<Worker> {
        self.workers.iter().map(|e| e.value().clone()).collect()
    }

    fn update_worker(&self, id: WorkerId, f: Box<dyn FnOnce(&mut Worker) + Send>) -> Result<(), StoreError> {
        let mut entry = self
            .workers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("worker:{id}")))?;
        f(&mut entry);
        Ok(())
    }

    fn put_deployment(&self, deployment: Deployment) {
        self.deployment_replicas
            .entry(deployment.id)
            .or_insert_with(|| RwLock::new(HashSet::new()));
        self.deployments.insert(deployment.id, deployment);
    }

    fn get_deployment(&self, id: DeploymentId) -> Option<Deployment> {
        self.deployments.get(&id).map(|d| d.clone())
    }

    fn deployment_ids(&self) -> Vec<DeploymentId> {
        self.deployments.iter().map(|e| *e.key()).collect()
    }

    fn all_deployments(&self) -> Vec<Deployment> {
        self.deployments.iter().map(|e| e.value().clone()).collect()
    }

    fn update_deployment(&self, id: DeploymentId, f: Box<dyn FnOnce(&mut Deployment) + Send>) -> Result<(), StoreError> {
        let mut entry = self
            .deployments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("deployment:{id}")))?;
        f(&mut entry);
        Ok(())
    }

    fn put_replica(&self, replica: Replica) {
        let deployment_id = replica.deployment_id;
        self.deployment_replicas
            .entry(deployment_id)
            .or_insert_with(|| RwLock::new(HashSet::new()))
            .write()
            .insert(replica.id);
        self.replicas.insert(replica.id, replica);
    }

    fn get_replica(&self, id: ReplicaId) -> Option<Replica> {
        self.replicas.get(&id).map(|r| r.clone())
    }

    fn delete_replica(&self, id: ReplicaId) {
        if let Some((_, replica)) = self.replicas.remove(&id) {
            if let Some(set) = self.deployment_replicas.get(&replica.deployment_id) {
                set.write().remove(&id);
            }
        }
    }

    fn replica_ids_for(&self, deployment_id: DeploymentId) -> Vec<ReplicaId> {
        self.deployment_replicas
            .get(&deployment_id)
            .map(|set| set.read().iter().copied().collect())
            .unwrap_or_default()
    }

    fn replicas_for(&self, deployment_id: DeploymentId) -> Vec<Replica> {
        let mut replicas: Vec<Replica> = self
            .replica_ids_for(deployment_id)
            .into_iter()
            .filter_map(|id| self.get_replica(id))
            .collect();
        replicas.sort_by_key(|r| r.replica_number);
        replicas
    }

    fn update_replica(&self, id: ReplicaId, f: Box<dyn FnOnce(&mut Replica) + Send>) -> Result<(), StoreError> {
        let mut entry = self
            .replicas
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("replica:{id}")))?;
        f(&mut entry);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DeploymentStatus, Load, Metrics, ReplicaStatus, WorkerStatus};
    use chrono::Utc;

    fn sample_worker(id: u64) -> Worker {
        Worker {
            id: WorkerId(id),
            hostname: format!("host-{id}"),
            status: WorkerStatus::Active,
            load: Load::default(),
            last_heartbeat: Utc::now(),
            registered_at: Utc::now(),
        }
    }

    fn sample_deployment(id: u64) -> Deployment {
        Deployment {
            id: DeploymentId(id),
            repo_ref: "https://github.com/acme/app.git".to_string(),
            owner: "acme".to_string(),
            min_replicas: 1,
            max_replicas: 3,
            status: DeploymentStatus::Deploying,
            last_scale_up: None,
            last_scale_down: None,
            assignments: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_counters_are_monotonic_and_independent() {
        let store = InMemoryStateStore::new();
        assert_eq!(store.incr(Counter::Worker), 1);
        assert_eq!(store.incr(Counter::Worker), 2);
        assert_eq!(store.incr(Counter::Deployment), 1);
        assert_eq!(store.incr(Counter::Replica), 1);
    }

    #[test]
    fn test_worker_round_trip() {
        let store = InMemoryStateStore::new();
        let worker = sample_worker(1);
        store.put_worker(worker.clone());

        let fetched = store.get_worker(WorkerId(1)).unwrap();
        assert_eq!(fetched.hostname, "host-1");
        assert_eq!(store.worker_ids(), vec![WorkerId(1)]);

        store
            .update_worker(WorkerId(1), Box::new(|w| w.status = WorkerStatus::Busy))
            .unwrap();
        assert_eq!(store.get_worker(WorkerId(1)).unwrap().status, WorkerStatus::Busy);

        store.delete_worker(WorkerId(1));
        assert!(store.get_worker(WorkerId(1)).is_none());
    }

    #[test]
    fn test_update_missing_worker_errors() {
        let store = InMemoryStateStore::new();
        let result = store.update_worker(WorkerId(99), Box::new(|_| {}));
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_replicas_for_deployment_sorted_by_number() {
        let store = InMemoryStateStore::new();
        store.put_deployment(sample_deployment(1));

        for (replica_id, replica_number) in [(3u64, 3u32), (1, 1), (2, 2)] {
            store.put_replica(Replica {
                id: ReplicaId(replica_id),
                deployment_id: DeploymentId(1),
                replica_number,
                status: ReplicaStatus::Active,
                metrics: Metrics::default(),
                created_at: Utc::now(),
            });
        }

        let replicas = store.replicas_for(DeploymentId(1));
        let numbers: Vec<u32> = replicas.iter().map(|r| r.replica_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_delete_replica_removes_from_deployment_set() {
        let store = InMemoryStateStore::new();
        store.put_deployment(sample_deployment(1));
        store.put_replica(Replica {
            id: ReplicaId(1),
            deployment_id: DeploymentId(1),
            replica_number: 1,
            status: ReplicaStatus::Active,
            metrics: Metrics::default(),
            created_at: Utc::now(),
        });

        store.delete_replica(ReplicaId(1));
        assert!(store.replicas_for(DeploymentId(1)).is_empty());
    }
}
