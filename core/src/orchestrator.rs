// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The coordinator tying the state store, worker registry, placement
//! engine, deployment manager and scaling controller together.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::deployments::{CreateDeploymentRequest, DeploymentManager};
use crate::error::OrchestratorResult;
use crate::placement::PlacementEngine;
use crate::registry::WorkerRegistry;
use crate::repo::RepositoryValidator;
use crate::scaling::ScalingController;
use crate::store::{InMemoryStateStore, StateStore};
use crate::types::{Deployment, DeploymentId, Replica, Worker};

/// The orchestrator's in-process handle, cheap to clone (every field is
/// an `Arc`) and intended to be shared across the admin HTTP server and
/// the worker-transport connection tasks.
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    registry: Arc<WorkerRegistry>,
    deployments: Arc<DeploymentManager>,
    scaling: Arc<ScalingController>,
    sweep_interval: chrono::Duration,
}

impl Orchestrator {
    /// Build a fresh orchestrator from configuration, using the real
    /// wall clock.
    pub fn new(config: Config) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Build a fresh orchestrator over an injected clock, for tests
    /// that need deterministic cooldown math.
    pub fn with_clock(config: Config, clock: Arc<dyn Clock>) -> Arc<Self> {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let inactive_timeout = chrono::Duration::seconds(config.registry.inactive_timeout_secs as i64);
        let registry = Arc::new(WorkerRegistry::new(store.clone(), clock.clone(), inactive_timeout));
        let placement = Arc::new(PlacementEngine::new(store.clone()));
        let validator = Arc::new(RepositoryValidator::default());
        let deployments = Arc::new(DeploymentManager::new(
            store.clone(),
            clock.clone(),
            registry.clone(),
            placement.clone(),
            validator,
            config.deployment_path.clone(),
        ));
        let scaling = Arc::new(ScalingController::new(
            store.clone(),
            clock,
            placement,
            deployments.clone(),
            config.scaling.into(),
        ));

        Arc::new(Self {
            store,
            registry,
            deployments,
            scaling,
            sweep_interval: chrono::Duration::seconds(config.registry.sweep_interval_secs as i64),
        })
    }

    /// The worker registry, shared with the connection-handling tasks.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// The deployment manager, shared with the admin HTTP handlers.
    pub fn deployment_manager(&self) -> &Arc<DeploymentManager> {
        &self.deployments
    }

    /// Create a deployment: the `POST /deploy` contract.
    pub async fn create_deployment(&self, request: CreateDeploymentRequest) -> OrchestratorResult<Deployment> {
        self.deployments.create(request).await
    }

    /// A single deployment by id.
    pub fn get_deployment(&self, id: DeploymentId) -> Option<Deployment> {
        self.store.get_deployment(id)
    }

    /// The 10 most recently created deployments, newest first.
    pub fn recent_deployments(&self) -> Vec<Deployment> {
        let mut deployments = self.store.all_deployments();
        deployments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        deployments.truncate(10);
        deployments
    }

    /// All known workers, freshest heartbeat first.
    pub fn workers_by_freshness(&self) -> Vec<Worker> {
        self.registry.all_sorted_by_freshness()
    }

    /// Replicas of a deployment, sorted by `replicaNumber` ascending.
    pub fn replicas_for(&self, deployment_id: DeploymentId) -> Vec<Replica> {
        self.store.replicas_for(deployment_id)
    }

    /// Spawn the periodic scaling-controller tick and worker-sweep
    /// background tasks. Consumes the `Arc` handle; callers that need to
    /// keep using the orchestrator should have cloned it first.
    pub fn run_background_loops(self: Arc<Self>) {
        let scaling_orchestrator = Arc::clone(&self);
        let check_interval = std_duration(scaling_orchestrator.scaling.check_interval());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_interval);
            loop {
                ticker.tick().await;
                scaling_orchestrator.scaling.tick();
            }
        });

        let sweep_interval = std_duration(self.sweep_interval);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                let removed = self.registry.sweep();
                if !removed.is_empty() {
                    info!(count = removed.len(), "swept inactive workers");
                }
            }
        });
    }
}

fn std_duration(duration: chrono::Duration) -> StdDuration {
    duration.to_std().unwrap_or(StdDuration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use chrono::Utc;

    #[tokio::test]
    async fn test_recent_deployments_sorted_newest_first() {
        let orchestrator = Orchestrator::with_clock(Config::default(), Arc::new(FakeClock::new(Utc::now())));

        for i in 1..=3u64 {
            orchestrator.store.put_deployment(Deployment {
                id: DeploymentId(i),
                repo_ref: "https://github.com/acme/app.git".to_string(),
                owner: "acme".to_string(),
                min_replicas: 1,
                max_replicas: 1,
                status: crate::types::DeploymentStatus::Active,
                last_scale_up: None,
                last_scale_down: None,
                assignments: Vec::new(),
                created_at: Utc::now() + chrono::Duration::seconds(i as i64),
            });
        }

        let recent = orchestrator.recent_deployments();
        assert_eq!(recent[0].id, DeploymentId(3));
        assert_eq!(recent[2].id, DeploymentId(1));
    }
}
