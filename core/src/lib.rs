// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Fleet Orchestrator Core
//!
//! A small container-orchestration brain: tracks worker nodes and
//! deployments, places new replicas, reacts to heartbeats and status
//! reports, and runs a scale-up / scale-down control loop that holds
//! average CPU load inside a target band.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Orchestrator                           │
//! │  ┌────────────┐  ┌─────────────┐  ┌─────────────────────┐   │
//! │  │ StateStore │  │   Worker    │  │  DeploymentManager   │   │
//! │  │ (C1)       │  │  Registry   │  │  (C5)                │   │
//! │  │            │  │  (C3)       │  │                      │   │
//! │  └────────────┘  └─────────────┘  └─────────────────────┘   │
//! │        │                │                    │              │
//! │        │         ┌──────┴──────┐      ┌───────┴──────┐      │
//! │        │         │  Placement  │      │   Scaling    │      │
//! │        │         │  Engine(C4) │      │ Controller   │      │
//! │        │         └─────────────┘      │   (C6)       │      │
//! │        │                              └──────────────┘      │
//! │        └──────────────── all through the store ─────────────│
//! └───────────────────────────────┬───────────────────────────────┘
//!                                 │ws / http
//!          ┌──────────────────────┼──────────────────────┐
//!          ▼                      ▼                      ▼
//!  ┌───────────────┐      ┌───────────────┐     ┌───────────────┐
//!  │  Worker 1      │      │  Worker 2      │     │  Worker N      │
//!  └───────────────┘      └───────────────┘     └───────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fleet_orchestrator_core::{Orchestrator, OrchestratorConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = OrchestratorConfig::default();
//!     let orchestrator = Orchestrator::new(config);
//!     orchestrator.run_background_loops();
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod api;
pub mod clock;
pub mod config;
pub mod deployments;
pub mod error;
pub mod orchestrator;
pub mod placement;
pub mod protocol;
pub mod registry;
pub mod repo;
pub mod scaling;
pub mod store;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use config::{Config as OrchestratorConfig, ConfigLoader};
pub use error::{OrchestratorError, OrchestratorResult};
pub use orchestrator::Orchestrator;
pub use protocol::{ServerMessage, WorkerMessage};
pub use store::{InMemoryStateStore, StateStore};
pub use types::{Deployment, DeploymentId, Replica, ReplicaId, Worker, WorkerId};

/// Crate version, exposed for the admin `/health` endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
