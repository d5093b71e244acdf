// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Orchestrator-wide error taxonomy.

use thiserror::Error;

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

/// Orchestrator errors.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The repository reference could not be canonicalized or does not exist.
    #[error("invalid repository: {0}")]
    InvalidRepository(String),

    /// The placement engine returned fewer workers than `minReplicas`.
    #[error("insufficient workers: needed {needed}, found {found}")]
    InsufficientWorkers {
        /// Workers required.
        needed: usize,
        /// Workers actually available.
        found: usize,
    },

    /// The routing handle for a worker is gone.
    #[error("worker unreachable: {0}")]
    WorkerUnreachable(String),

    /// The state store failed; callers should treat this as retriable.
    #[error("state store failure: {0}")]
    StateStoreFailure(#[from] crate::store::StoreError),

    /// A worker reported a failed task via `deploymentStatus`.
    #[error("worker task failed: {0}")]
    WorkerTaskFailed(String),

    /// A malformed wire message was received.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// The referenced deployment does not exist.
    #[error("deployment not found: {0}")]
    DeploymentNotFound(u64),

    /// The referenced worker does not exist.
    #[error("worker not found: {0}")]
    WorkerNotFound(u64),
}

impl From<reqwest::Error> for OrchestratorError {
    fn from(err: reqwest::Error) -> Self {
        Self::InvalidRepository(err.to_string())
    }
}
