// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Worker / Deployment / Replica entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Worker identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u64);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deployment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeploymentId(pub u64);

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Replica identifier (the opaque global id, distinct from `replicaNumber`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReplicaId(pub u64);

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Worker lifecycle / load status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    /// Reachable, under load thresholds.
    Active,
    /// Reachable, elevated load.
    Busy,
    /// Reachable, over the overload thresholds.
    Overloaded,
    /// No heartbeat within `inactiveTimeout`.
    Inactive,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Busy => write!(f, "busy"),
            Self::Overloaded => write!(f, "overloaded"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// Worker-reported load sample.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Load {
    /// CPU usage, percent.
    pub cpu_usage: f64,
    /// Memory usage, percent.
    pub memory_usage: f64,
    /// Number of containers currently running on this worker.
    pub running_containers: usize,
}

impl Default for Load {
    fn default() -> Self {
        Self {
            cpu_usage: 0.0,
            memory_usage: 0.0,
            running_containers: 0,
        }
    }
}

/// A worker node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    /// Identifier.
    pub id: WorkerId,
    /// Stable identity used to dedup reconnects.
    pub hostname: String,
    /// Lifecycle / load status.
    pub status: WorkerStatus,
    /// Last reported load.
    pub load: Load,
    /// Time of the last `workerStatus` report.
    pub last_heartbeat: DateTime<Utc>,
    /// Time this worker record was created.
    pub registered_at: DateTime<Utc>,
}

impl Worker {
    /// True if this worker hasn't missed a heartbeat within `timeout`.
    pub fn is_healthy(&self, now: DateTime<Utc>, timeout: chrono::Duration) -> bool {
        now.signed_duration_since(self.last_heartbeat) <= timeout
    }
}

/// Replica status as recorded both on the `Replica` entity and in its
/// deployment's `assignments` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    /// Dispatched, not yet confirmed running.
    Pending,
    /// Confirmed running by the worker.
    Active,
    /// The worker reported a build/run failure.
    Failed,
    /// Scale-down in progress; awaiting worker confirmation.
    Removing,
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
            Self::Removing => write!(f, "removing"),
        }
    }
}

/// Per-replica reported metrics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Metrics {
    /// CPU usage, percent.
    pub cpu_usage: f64,
    /// Memory usage, percent.
    pub memory_usage: f64,
}

/// One running (or pending) instance of a deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Replica {
    /// Identifier.
    pub id: ReplicaId,
    /// Owning deployment.
    pub deployment_id: DeploymentId,
    /// 1-based, dense, unique within the deployment.
    pub replica_number: u32,
    /// Status.
    pub status: ReplicaStatus,
    /// Last reported metrics.
    pub metrics: Metrics,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Deployment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    /// Replicas dispatched, not yet confirmed.
    Deploying,
    /// All initial dispatches were delivered.
    Active,
    /// A dispatch raised `WorkerUnreachable`; partial state stands.
    Failed,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploying => write!(f, "deploying"),
            Self::Active => write!(f, "active"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One entry of a deployment's `assignments` sequence: where a replica lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    /// The worker this replica runs on.
    pub worker_id: WorkerId,
    /// 1-based position within the deployment.
    pub replica_number: u32,
    /// Status mirrored from the Replica entity.
    pub status: ReplicaStatus,
}

/// The logical record of "run repository R as N-M replicas".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Identifier.
    pub id: DeploymentId,
    /// Canonical clone URL, e.g. `https://github.com/acme/app.git`.
    pub repo_ref: String,
    /// Free-text owner, as supplied by the operator.
    pub owner: String,
    /// Minimum replica count, `>= 1`.
    pub min_replicas: u32,
    /// Maximum replica count, `>= min_replicas`.
    pub max_replicas: u32,
    /// Lifecycle status.
    pub status: DeploymentStatus,
    /// Timestamp of the last scale-up action, if any.
    pub last_scale_up: Option<DateTime<Utc>>,
    /// Timestamp of the last scale-down action, if any.
    pub last_scale_down: Option<DateTime<Utc>>,
    /// Ordered sequence of where replicas live; `replica_number` is dense
    /// and starts at 1.
    pub assignments: Vec<Assignment>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// The current replica count, i.e. `|assignments|`.
    pub fn replica_count(&self) -> usize {
        self.assignments.len()
    }
}
