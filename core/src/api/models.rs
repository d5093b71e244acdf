// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Admin HTTP request/response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Deployment, DeploymentStatus, Replica, Worker, WorkerStatus};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status, always `"healthy"` while the process is up.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Response timestamp.
    pub timestamp: DateTime<Utc>,
}

/// `POST /deploy` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    /// User-supplied repository reference.
    pub github_repo: String,
    /// Free-text owner.
    pub user_name: String,
    /// Defaults to 1 when absent.
    #[serde(default)]
    pub min_replicas: Option<u32>,
    /// Defaults to `min_replicas` when absent.
    #[serde(default)]
    pub max_replicas: Option<u32>,
}

/// `POST /deploy`, `GET /deployments`, `GET /deployment/{id}` response shape.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResponse {
    /// Deployment id.
    pub id: u64,
    /// Canonical clone URL.
    pub repo_ref: String,
    /// Free-text owner.
    pub owner: String,
    /// Minimum replica count.
    pub min_replicas: u32,
    /// Maximum replica count.
    pub max_replicas: u32,
    /// Lifecycle status.
    pub status: DeploymentStatus,
    /// Current replica count.
    pub replica_count: usize,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<Deployment> for DeploymentResponse {
    fn from(deployment: Deployment) -> Self {
        Self {
            id: deployment.id.0,
            repo_ref: deployment.repo_ref,
            owner: deployment.owner,
            min_replicas: deployment.min_replicas,
            max_replicas: deployment.max_replicas,
            status: deployment.status,
            replica_count: deployment.assignments.len(),
            created_at: deployment.created_at,
        }
    }
}

/// `GET /workers` entry shape.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerResponse {
    /// Worker id.
    pub id: u64,
    /// Stable hostname identity.
    pub hostname: String,
    /// Lifecycle/load status.
    pub status: WorkerStatus,
    /// CPU usage, percent.
    pub cpu_usage: f64,
    /// Memory usage, percent.
    pub memory_usage: f64,
    /// Last heartbeat time.
    pub last_heartbeat: DateTime<Utc>,
}

impl From<Worker> for WorkerResponse {
    fn from(worker: Worker) -> Self {
        Self {
            id: worker.id.0,
            hostname: worker.hostname,
            status: worker.status,
            cpu_usage: worker.load.cpu_usage,
            memory_usage: worker.load.memory_usage,
            last_heartbeat: worker.last_heartbeat,
        }
    }
}

/// `GET /replicas/{deploymentId}` entry shape.
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaResponse {
    /// Deployment-local replica number.
    pub replica_number: u32,
    /// Status.
    pub status: crate::types::ReplicaStatus,
    /// CPU usage, percent.
    pub cpu_usage: f64,
    /// Memory usage, percent.
    pub memory_usage: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl From<Replica> for ReplicaResponse {
    fn from(replica: Replica) -> Self {
        Self {
            replica_number: replica.replica_number,
            status: replica.status,
            cpu_usage: replica.metrics.cpu_usage,
            memory_usage: replica.metrics.memory_usage,
            created_at: replica.created_at,
        }
    }
}

/// Admin API error response body.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,
}

impl ErrorResponse {
    /// Build an error response body.
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Assignment, DeploymentId, Metrics, ReplicaId, ReplicaStatus};

    #[test]
    fn test_deployment_response_reports_replica_count() {
        let deployment = Deployment {
            id: DeploymentId(1),
            repo_ref: "https://github.com/acme/app.git".to_string(),
            owner: "acme".to_string(),
            min_replicas: 1,
            max_replicas: 3,
            status: DeploymentStatus::Active,
            last_scale_up: None,
            last_scale_down: None,
            assignments: vec![Assignment {
                worker_id: crate::types::WorkerId(1),
                replica_number: 1,
                status: ReplicaStatus::Active,
            }],
            created_at: Utc::now(),
        };

        let response = DeploymentResponse::from(deployment);
        assert_eq!(response.replica_count, 1);
        assert_eq!(response.id, 1);
    }

    #[test]
    fn test_replica_response_carries_metrics() {
        let replica = Replica {
            id: ReplicaId(1),
            deployment_id: DeploymentId(1),
            replica_number: 1,
            status: ReplicaStatus::Active,
            metrics: Metrics {
                cpu_usage: 33.0,
                memory_usage: 12.0,
            },
            created_at: Utc::now(),
        };

        let response = ReplicaResponse::from(replica);
        assert_eq!(response.cpu_usage, 33.0);
    }
}
