// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! The orchestrator-worker wire protocol: JSON messages over a
//! persistent, bidirectional, message-oriented connection.
//!
//! `replicaId` on the wire always means `replicaNumber` — the
//! per-deployment 1-based position, never the global `ReplicaId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeploymentId, Load, Metrics, ReplicaStatus, WorkerId, WorkerStatus};

/// Messages a worker sends to the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum WorkerMessage {
    /// First message on a new connection.
    RegisterWorker {
        /// Stable machine identity.
        hostname: String,
        /// When the agent process started.
        start_time: DateTime<Utc>,
        /// The OS user the agent runs as.
        current_user: String,
    },
    /// Periodic load telemetry, every 15 s.
    WorkerStatus {
        /// The reporting worker's id.
        worker_id: WorkerId,
        /// Derived status.
        status: WorkerStatus,
        /// Current load sample.
        load: Load,
        /// When this sample was taken.
        timestamp: DateTime<Utc>,
    },
    /// Reported after a `deployRepository` task completes (or fails).
    DeploymentStatus {
        /// The reporting worker's id.
        worker_id: WorkerId,
        /// Which deployment this replica belongs to.
        deployment_id: DeploymentId,
        /// The deployment-local replica number (not the global id).
        replica_id: u32,
        /// Resulting status.
        status: ReplicaStatus,
        /// The host port bound, on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        /// Container metrics, on success.
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<Metrics>,
        /// Failure detail, on failure.
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        /// When this report was produced.
        timestamp: DateTime<Utc>,
    },
    /// Confirms a `removeReplica` request has been carried out.
    ReplicaRemoved {
        /// The reporting worker's id.
        worker_id: WorkerId,
        /// Which deployment this replica belonged to.
        deployment_id: DeploymentId,
        /// The deployment-local replica number.
        replica_id: u32,
        /// When removal completed.
        timestamp: DateTime<Utc>,
    },
}

/// Messages the orchestrator sends to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Acknowledges a `registerWorker`, carrying the assigned id.
    WorkerRegistered {
        /// The worker's newly assigned id.
        id: WorkerId,
    },
    /// Instructs a worker to clone, build and run one replica.
    DeployRepository {
        /// Working directory for this replica on the worker.
        deployment_dir: String,
        /// Canonical clone URL.
        repo_url: String,
        /// The deployment-local replica number (wire name: `replicaId`).
        replica_id: u32,
        /// Which deployment this replica belongs to.
        deployment_id: DeploymentId,
        /// When this dispatch was issued.
        deployment_time: DateTime<Utc>,
    },
    /// Instructs a worker to tear down one replica.
    RemoveReplica {
        /// Which deployment this replica belongs to.
        deployment_id: DeploymentId,
        /// The deployment-local replica number (wire name: `replicaId`).
        replica_id: u32,
    },
    /// A malformed or out-of-protocol message was received; logged by
    /// the worker and otherwise ignored.
    Error {
        /// Human-readable detail.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deploy_repository_serializes_replica_id_field() {
        let msg = ServerMessage::DeployRepository {
            deployment_dir: "/deployments/1/2".to_string(),
            repo_url: "https://github.com/acme/app.git".to_string(),
            replica_id: 2,
            deployment_id: DeploymentId(1),
            deployment_time: Utc::now(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "deployRepository");
        assert_eq!(json["replicaId"], 2);
        assert_eq!(json["deploymentId"], 1);
    }

    #[test]
    fn test_worker_status_round_trips() {
        let msg = WorkerMessage::WorkerStatus {
            worker_id: WorkerId(3),
            status: WorkerStatus::Busy,
            load: Load {
                cpu_usage: 72.5,
                memory_usage: 40.0,
                running_containers: 2,
            },
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        let parsed: WorkerMessage = serde_json::from_str(&json).unwrap();
        match parsed {
            WorkerMessage::WorkerStatus { worker_id, status, .. } => {
                assert_eq!(worker_id, WorkerId(3));
                assert_eq!(status, WorkerStatus::Busy);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_deployment_status_optional_fields_omitted_when_absent() {
        let msg = WorkerMessage::DeploymentStatus {
            worker_id: WorkerId(1),
            deployment_id: DeploymentId(1),
            replica_id: 1,
            status: ReplicaStatus::Failed,
            port: None,
            metrics: None,
            error: Some("build failed".to_string()),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("port").is_none());
        assert!(json.get("metrics").is_none());
        assert_eq!(json["error"], "build failed");
    }
}
