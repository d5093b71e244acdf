// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Candidate-worker selection for new replicas.

use std::sync::Arc;

use crate::store::{InMemoryStateStore, StateStore};
use crate::types::{Worker, WorkerStatus};

/// Workers eligible to receive new replicas are `active` and under the
/// CPU ceiling; this is the only eligibility rule, checked fresh on
/// every call since selection is advisory.
const MAX_CPU_USAGE_FOR_PLACEMENT: f64 = 80.0;

/// Selects candidate workers for new replicas.
///
/// Selection is advisory: by the time a dispatch actually goes out a
/// chosen worker may have disconnected. Callers must cope with
/// `WorkerUnreachable` on dispatch rather than relying on this engine's
/// answer staying valid.
pub struct PlacementEngine {
    store: Arc<dyn StateStore>,
}

impl PlacementEngine {
    /// Build a placement engine over a shared store.
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    fn eligible(&self) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self
            .store
            .all_workers()
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Active && w.load.cpu_usage < MAX_CPU_USAGE_FOR_PLACEMENT)
            .collect();

        workers.sort_by(|a, b| {
            a.load
                .cpu_usage
                .partial_cmp(&b.load.cpu_usage)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.last_heartbeat.cmp(&b.last_heartbeat))
        });
        workers
    }

    /// Up to `n` eligible workers, ascending by CPU usage, ties broken
    /// by earlier `lastHeartbeat`.
    pub fn select_workers(&self, n: usize) -> Vec<Worker> {
        self.eligible().into_iter().take(n).collect()
    }

    /// The single best eligible worker, used on scale-up.
    pub fn find_one(&self) -> Option<Worker> {
        self.eligible().into_iter().next()
    }
}
