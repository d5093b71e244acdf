// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! # Orchestrator API surface
//!
//! Two distinct surfaces share one `axum::Router<Arc<Orchestrator>>`:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Orchestrator HTTP server                  │
//! │                                                             │
//! │  ┌────────────────────────┐   ┌────────────────────────┐   │
//! │  │   Admin REST API       │   │  Worker WebSocket       │   │
//! │  │  POST /deploy          │   │  GET /ws (upgrade)      │   │
//! │  │  GET  /deployments     │   │  registerWorker →       │   │
//! │  │  GET  /deployment/:id  │   │  workerStatus →         │   │
//! │  │  GET  /workers         │   │  deploymentStatus →     │   │
//! │  │  GET  /replicas/:id    │   │  ← deployRepository     │   │
//! │  └────────────────────────┘   └────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod error;
pub mod models;
pub mod rest;
pub mod ws;

pub use error::{ApiError, ApiResult};
pub use rest::RestApi;
pub use ws::ws_handler;
