// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Deployment lifecycle: creation, status events, and removal.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::placement::PlacementEngine;
use crate::protocol::ServerMessage;
use crate::registry::WorkerRegistry;
use crate::repo::RepositoryValidator;
use crate::store::{Counter, StateStore};
#[cfg(test)]
use crate::store::InMemoryStateStore;
use crate::types::{
    Assignment, Deployment, DeploymentId, DeploymentStatus, Metrics, Replica, ReplicaId,
    ReplicaStatus,
};

/// Operator-supplied deployment request.
#[derive(Debug, Clone)]
pub struct CreateDeploymentRequest {
    /// User-supplied repository reference, pre-canonicalization.
    pub repo_ref: String,
    /// Free-text owner.
    pub owner: String,
    /// Defaults to 1 when absent.
    pub min_replicas: Option<u32>,
    /// Defaults to `min_replicas` when absent.
    pub max_replicas: Option<u32>,
}

const DEFAULT_MIN_REPLICAS: u32 = 1;

/// Creates deployments, distributes initial replicas, handles status
/// reports, and tears down replicas on scale-down.
pub struct DeploymentManager {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<WorkerRegistry>,
    placement: Arc<PlacementEngine>,
    validator: Arc<RepositoryValidator>,
    deployment_path: String,
}

impl DeploymentManager {
    /// Build a deployment manager wired to the shared components.
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        registry: Arc<WorkerRegistry>,
        placement: Arc<PlacementEngine>,
        validator: Arc<RepositoryValidator>,
        deployment_path: String,
    ) -> Self {
        Self {
            store,
            clock,
            registry,
            placement,
            validator,
            deployment_path,
        }
    }

    /// Validate, place, persist and dispatch a new deployment.
    ///
    /// Per the wire contract, `deployRepository` is dispatched to each
    /// chosen worker before the deployment flips to `active`; dispatch
    /// acknowledgements are not collected, and a `WorkerUnreachable` on
    /// any single dispatch leaves the deployment `failed` with whatever
    /// assignments were already delivered standing — there is no
    /// rollback of already-delivered workers.
    pub async fn create(&self, request: CreateDeploymentRequest) -> OrchestratorResult<Deployment> {
        let (canonical_url, _meta) = self.validator.validate(&request.repo_ref).await?;

        let min_replicas = request.min_replicas.unwrap_or(DEFAULT_MIN_REPLICAS);
        let max_replicas = request.max_replicas.unwrap_or(min_replicas);
        let candidates = self.candidate_workers(min_replicas, max_replicas)?;

        let deployment_id = DeploymentId(self.store.incr(Counter::Deployment));
        let now = self.clock.now();

        let mut assignments = Vec::with_capacity(min_replicas as usize);
        for (index, worker) in candidates.iter().take(min_replicas as usize).enumerate() {
            let replica_number = (index + 1) as u32;
            assignments.push(Assignment {
                worker_id: worker.id,
                replica_number,
                status: ReplicaStatus::Pending,
            });
        }

        let deployment = Deployment {
            id: deployment_id,
            repo_ref: canonical_url.clone(),
            owner: request.owner,
            min_replicas,
            max_replicas,
            status: DeploymentStatus::Deploying,
            last_scale_up: None,
            last_scale_down: None,
            assignments: assignments.clone(),
            created_at: now,
        };
        self.store.put_deployment(deployment);

        for assignment in &assignments {
            let replica_id = ReplicaId(self.store.incr(Counter::Replica));
            self.store.put_replica(Replica {
                id: replica_id,
                deployment_id,
                replica_number: assignment.replica_number,
                status: ReplicaStatus::Pending,
                metrics: Metrics::default(),
                created_at: now,
            });
        }

        let mut dispatch_failed = false;
        for assignment in &assignments {
            if let Err(err) = self.dispatch_deploy(deployment_id, assignment.worker_id, assignment.replica_number) {
                warn!(%deployment_id, worker_id = %assignment.worker_id, error = %err, "dispatch failed");
                dispatch_failed = true;
            }
        }

        let final_status = if dispatch_failed {
            DeploymentStatus::Failed
        } else {
            DeploymentStatus::Active
        };
        self.store
            .update_deployment(deployment_id, Box::new(move |d| d.status = final_status))?;

        info!(%deployment_id, status = %final_status, "deployment created");
        self.store
            .get_deployment(deployment_id)
            .ok_or(OrchestratorError::DeploymentNotFound(deployment_id.0))
    }

    /// Validate replica bounds and ask the placement engine for up to
    /// `max_replicas` candidates, failing with `InsufficientWorkers` if
    /// fewer than `min_replicas` come back.
    fn candidate_workers(
        &self,
        min_replicas: u32,
        max_replicas: u32,
    ) -> OrchestratorResult<Vec<crate::types::Worker>> {
        if min_replicas == 0 || min_replicas > max_replicas {
            return Err(OrchestratorError::InvalidRepository(format!(
                "invalid replica bounds: min={min_replicas} max={max_replicas}"
            )));
        }

        let candidates = self.placement.select_workers(max_replicas as usize);
        if candidates.len() < min_replicas as usize {
            return Err(OrchestratorError::InsufficientWorkers {
                needed: min_replicas as usize,
                found: candidates.len(),
            });
        }
        Ok(candidates)
    }

    fn dispatch_deploy(
        &self,
        deployment_id: DeploymentId,
        worker_id: crate::types::WorkerId,
        replica_number: u32,
    ) -> OrchestratorResult<()> {
        let message = ServerMessage::DeployRepository {
            deployment_dir: format!("{}/{}/{}", self.deployment_path, deployment_id.0, replica_number),
            repo_url: self
                .store
                .get_deployment(deployment_id)
                .map(|d| d.repo_ref)
                .unwrap_or_default(),
            replica_id: replica_number,
            deployment_id,
            deployment_time: self.clock.now(),
        };
        self.registry.route_to(worker_id, message)
    }

    /// Apply a worker's `deploymentStatus` report.
    ///
    /// `replica_number` here is the wire-protocol `replicaId`, which
    /// aliases the deployment-local position, not the global Replica id.
    pub fn on_deployment_status(
        &self,
        deployment_id: DeploymentId,
        replica_number: u32,
        status: ReplicaStatus,
        metrics: Option<Metrics>,
    ) -> OrchestratorResult<()> {
        self.store.update_deployment(
            deployment_id,
            Box::new(move |deployment| {
                if let Some(assignment) = deployment
                    .assignments
                    .iter_mut()
                    .find(|a| a.replica_number == replica_number)
                {
                    assignment.status = status;
                }
            }),
        )?;

        let replica_id = self
            .store
            .replicas_for(deployment_id)
            .into_iter()
            .find(|r| r.replica_number == replica_number)
            .map(|r| r.id);

        if let Some(replica_id) = replica_id {
            self.store.update_replica(
                replica_id,
                Box::new(move |replica| {
                    replica.status = status;
                    if let Some(metrics) = metrics {
                        replica.metrics = metrics;
                    }
                }),
            )?;
        }

        Ok(())
    }

    /// Add one replica to `deployment_id` on the given worker, at the
    /// next dense `replicaNumber`. Used by scale-up.
    pub fn add_replica(
        &self,
        deployment_id: DeploymentId,
        worker_id: crate::types::WorkerId,
    ) -> OrchestratorResult<u32> {
        let now = self.clock.now();
        let replica_number = self
            .store
            .get_deployment(deployment_id)
            .ok_or(OrchestratorError::DeploymentNotFound(deployment_id.0))?
            .replica_count() as u32
            + 1;

        let replica_id = ReplicaId(self.store.incr(Counter::Replica));
        self.store.put_replica(Replica {
            id: replica_id,
            deployment_id,
            replica_number,
            status: ReplicaStatus::Pending,
            metrics: Metrics::default(),
            created_at: now,
        });

        self.store.update_deployment(
            deployment_id,
            Box::new(move |deployment| {
                deployment.assignments.push(Assignment {
                    worker_id,
                    replica_number,
                    status: ReplicaStatus::Pending,
                });
                deployment.last_scale_up = Some(now);
            }),
        )?;

        self.dispatch_deploy(deployment_id, worker_id, replica_number)?;
        Ok(replica_number)
    }

    /// Remove the tail replica (highest `replicaNumber`) of a deployment.
    /// Used by scale-down.
    pub fn remove_tail_replica(&self, deployment_id: DeploymentId) -> OrchestratorResult<()> {
        let now = self.clock.now();
        let deployment = self
            .store
            .get_deployment(deployment_id)
            .ok_or(OrchestratorError::DeploymentNotFound(deployment_id.0))?;

        let tail = deployment
            .assignments
            .iter()
            .max_by_key(|a| a.replica_number)
            .cloned()
            .ok_or(OrchestratorError::DeploymentNotFound(deployment_id.0))?;

        self.registry.route_to(
            tail.worker_id,
            ServerMessage::RemoveReplica {
                deployment_id,
                replica_id: tail.replica_number,
            },
        )?;

        self.store.update_deployment(
            deployment_id,
            Box::new(move |deployment| {
                deployment
                    .assignments
                    .retain(|a| a.replica_number != tail.replica_number);
                deployment.last_scale_down = Some(now);
            }),
        )?;

        let replica_id = self
            .store
            .replicas_for(deployment_id)
            .into_iter()
            .find(|r| r.replica_number == tail.replica_number)
            .map(|r| r.id);
        if let Some(replica_id) = replica_id {
            self.store.delete_replica(replica_id);
        }

        Ok(())
    }
}

/// Default bounded timeout for code-host validation during `create`.
pub const VALIDATE_TIMEOUT: StdDuration = StdDuration::from_secs(5);
