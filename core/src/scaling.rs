// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Periodic scale-up / scale-down control loop.

use std::sync::Arc;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::deployments::DeploymentManager;
use crate::placement::PlacementEngine;
use crate::store::StateStore;
#[cfg(test)]
use crate::store::InMemoryStateStore;
use crate::types::{DeploymentId, DeploymentStatus, ReplicaStatus};

/// Tunables for the scaling controller, defaulting to the values
/// prescribed for the orchestrator's scale loop.
#[derive(Debug, Clone, Copy)]
pub struct ScalingConfig {
    /// Scale-up fires above this average CPU usage.
    pub cpu_threshold: f64,
    /// How often the controller wakes.
    pub check_interval: chrono::Duration,
    /// Minimum time between consecutive scale-ups on one deployment.
    pub scale_up_cooldown: chrono::Duration,
    /// Minimum time between consecutive scale-downs on one deployment.
    pub scale_down_cooldown: chrono::Duration,
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            cpu_threshold: 70.0,
            check_interval: chrono::Duration::seconds(30),
            scale_up_cooldown: chrono::Duration::seconds(300),
            scale_down_cooldown: chrono::Duration::seconds(600),
        }
    }
}

/// The outcome of one deployment's evaluation in a tick, surfaced for
/// logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalingAction {
    /// A replica was added.
    ScaledUp,
    /// The tail replica was removed.
    ScaledDown,
    /// Conditions not met, or under cooldown.
    NoChange,
}

/// Computes average CPU per deployment and emits scale-up / scale-down
/// actions under cooldowns and replica bounds.
pub struct ScalingController {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    placement: Arc<PlacementEngine>,
    deployments: Arc<DeploymentManager>,
    config: ScalingConfig,
}

impl ScalingController {
    /// Build a scaling controller over the shared components.
    pub fn new(
        store: Arc<dyn StateStore>,
        clock: Arc<dyn Clock>,
        placement: Arc<PlacementEngine>,
        deployments: Arc<DeploymentManager>,
        config: ScalingConfig,
    ) -> Self {
        Self {
            store,
            clock,
            placement,
            deployments,
            config,
        }
    }

    fn average_cpu(&self, deployment_id: DeploymentId) -> f64 {
        let active: Vec<f64> = self
            .store
            .replicas_for(deployment_id)
            .into_iter()
            .filter(|r| r.status == ReplicaStatus::Active)
            .map(|r| r.metrics.cpu_usage)
            .collect();

        if active.is_empty() {
            0.0
        } else {
            active.iter().sum::<f64>() / active.len() as f64
        }
    }

    /// Evaluate and, if warranted, act on a single deployment. At most
    /// one scaling action is taken per call.
    pub fn evaluate_deployment(&self, deployment_id: DeploymentId) -> ScalingAction {
        let Some(deployment) = self.store.get_deployment(deployment_id) else {
            return ScalingAction::NoChange;
        };
        if deployment.status != DeploymentStatus::Active {
            return ScalingAction::NoChange;
        }

        let now = self.clock.now();
        let avg_cpu = self.average_cpu(deployment_id);
        let replica_count = deployment.replica_count() as u32;

        let scale_up_ready = deployment
            .last_scale_up
            .map(|last| now.signed_duration_since(last) > self.config.scale_up_cooldown)
            .unwrap_or(true);

        if avg_cpu > self.config.cpu_threshold
            && replica_count < deployment.max_replicas
            && scale_up_ready
        {
            return match self.placement.find_one() {
                Some(worker) => match self.deployments.add_replica(deployment_id, worker.id) {
                    Ok(replica_number) => {
                        info!(%deployment_id, replica_number, avg_cpu, "scaled up");
                        ScalingAction::ScaledUp
                    }
                    Err(err) => {
                        warn!(%deployment_id, error = %err, "scale-up dispatch failed");
                        ScalingAction::NoChange
                    }
                },
                None => ScalingAction::NoChange,
            };
        }

        let scale_down_ready = deployment
            .last_scale_down
            .map(|last| now.signed_duration_since(last) > self.config.scale_down_cooldown)
            .unwrap_or(true);

        if avg_cpu < self.config.cpu_threshold / 2.0
            && replica_count > deployment.min_replicas
            && scale_down_ready
        {
            return match self.deployments.remove_tail_replica(deployment_id) {
                Ok(()) => {
                    info!(%deployment_id, avg_cpu, "scaled down");
                    ScalingAction::ScaledDown
                }
                Err(err) => {
                    warn!(%deployment_id, error = %err, "scale-down dispatch failed");
                    ScalingAction::NoChange
                }
            };
        }

        ScalingAction::NoChange
    }

    /// One tick: evaluate every active deployment.
    pub fn tick(&self) {
        for deployment_id in self.store.deployment_ids() {
            self.evaluate_deployment(deployment_id);
        }
    }

    /// The configured wake period, for the background scheduler.
    pub fn check_interval(&self) -> chrono::Duration {
        self.config.check_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::registry::WorkerRegistry;
    use crate::repo::RepositoryValidator;
    use crate::types::{Assignment, Deployment, Load, Metrics, Replica, ReplicaId, Worker, WorkerId, WorkerStatus};
    use chrono::Utc;
    use tokio::sync::mpsc::unbounded_channel;

    struct Harness {
        store: Arc<dyn StateStore>,
        clock: Arc<FakeClock>,
        controller: ScalingController,
    }

    fn deployment_with_replicas(
        replica_numbers_and_cpu: &[(u32, f64)],
        min: u32,
        max: u32,
    ) -> (Deployment, Vec<Replica>) {
        let now = Utc::now();
        let assignments: Vec<Assignment> = replica_numbers_and_cpu
            .iter()
            .map(|(n, _)| Assignment {
                worker_id: WorkerId(1),
                replica_number: *n,
                status: ReplicaStatus::Active,
            })
            .collect();
        let replicas: Vec<Replica> = replica_numbers_and_cpu
            .iter()
            .enumerate()
            .map(|(i, (n, cpu))| Replica {
                id: ReplicaId((i + 1) as u64),
                deployment_id: DeploymentId(1),
                replica_number: *n,
                status: ReplicaStatus::Active,
                metrics: Metrics {
                    cpu_usage: *cpu,
                    memory_usage: 0.0,
                },
                created_at: now,
            })
            .collect();

        let deployment = Deployment {
            id: DeploymentId(1),
            repo_ref: "https://github.com/acme/app.git".to_string(),
            owner: "acme".to_string(),
            min_replicas: min,
            max_replicas: max,
            status: DeploymentStatus::Active,
            last_scale_up: None,
            last_scale_down: None,
            assignments,
            created_at: now,
        };
        (deployment, replicas)
    }

    fn harness() -> Harness {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let clock = Arc::new(FakeClock::new(Utc::now()));
        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let registry = Arc::new(WorkerRegistry::new(
            store.clone(),
            clock_dyn.clone(),
            chrono::Duration::seconds(120),
        ));

        let (tx, rx) = unbounded_channel();
        std::mem::forget(rx);
        store.put_worker(Worker {
            id: WorkerId(1),
            hostname: "host-1".to_string(),
            status: WorkerStatus::Active,
            load: Load {
                cpu_usage: 10.0,
                memory_usage: 0.0,
                running_containers: 0,
            },
            last_heartbeat: Utc::now(),
            registered_at: Utc::now(),
        });
        registry.register("host-1".to_string(), tx);

        let placement = Arc::new(PlacementEngine::new(store.clone()));
        let validator = Arc::new(RepositoryValidator::default());
        let deployments = Arc::new(DeploymentManager::new(
            store.clone(),
            clock_dyn.clone(),
            registry,
            placement.clone(),
            validator,
            "/deployments".to_string(),
        ));

        let controller = ScalingController::new(
            store.clone(),
            clock_dyn,
            placement,
            deployments,
            ScalingConfig::default(),
        );

        Harness {
            store,
            clock,
            controller,
        }
    }

    /// S1: cooldown respected across ticks.
    #[test]
    fn test_s1_cooldown_respected() {
        let h = harness();
        let (deployment, replicas) = deployment_with_replicas(&[(1, 85.0), (2, 85.0)], 2, 4);
        h.store.put_deployment(deployment);
        for r in replicas {
            h.store.put_replica(r);
        }

        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::ScaledUp);
        assert_eq!(h.store.get_deployment(DeploymentId(1)).unwrap().replica_count(), 3);

        h.clock.advance(chrono::Duration::seconds(60));
        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::NoChange);

        h.clock.advance(chrono::Duration::seconds(250));
        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::ScaledUp);
        assert_eq!(h.store.get_deployment(DeploymentId(1)).unwrap().replica_count(), 4);
    }

    /// S2: dead band between scale-down and scale-up thresholds.
    #[test]
    fn test_s2_dead_band() {
        let h = harness();
        let (deployment, replicas) =
            deployment_with_replicas(&[(1, 40.0), (2, 40.0), (3, 40.0)], 2, 4);
        h.store.put_deployment(deployment);
        for r in replicas {
            h.store.put_replica(r);
        }

        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::ScaledDown);
        assert_eq!(h.store.get_deployment(DeploymentId(1)).unwrap().replica_count(), 2);

        h.clock.advance(chrono::Duration::seconds(700));
        for replica in h.store.replicas_for(DeploymentId(1)) {
            h.store
                .update_replica(replica.id, Box::new(|r| r.metrics.cpu_usage = 50.0))
                .unwrap();
        }
        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::NoChange);
    }

    /// S6: tail removal, then cooldown holds even as load stays low.
    #[test]
    fn test_s6_tail_removal_then_cooldown_holds() {
        let h = harness();
        let (deployment, replicas) =
            deployment_with_replicas(&[(1, 10.0), (2, 10.0), (3, 10.0)], 1, 4);
        h.store.put_deployment(deployment);
        for r in replicas {
            h.store.put_replica(r);
        }

        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::ScaledDown);
        let numbers: Vec<u32> = h
            .store
            .get_deployment(DeploymentId(1))
            .unwrap()
            .assignments
            .iter()
            .map(|a| a.replica_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
        assert!(h.store.replicas_for(DeploymentId(1)).iter().all(|r| r.replica_number != 3));

        h.clock.advance(chrono::Duration::seconds(60));
        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::NoChange);
    }

    #[test]
    fn test_inactive_deployment_is_skipped() {
        let h = harness();
        let (mut deployment, replicas) = deployment_with_replicas(&[(1, 90.0)], 1, 3);
        deployment.status = DeploymentStatus::Deploying;
        h.store.put_deployment(deployment);
        for r in replicas {
            h.store.put_replica(r);
        }

        assert_eq!(h.controller.evaluate_deployment(DeploymentId(1)), ScalingAction::NoChange);
    }
}
