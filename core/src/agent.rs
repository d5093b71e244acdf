// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Capability traits the worker agent's runtime drives: cloning a
//! repository and running it in a container. Concrete implementations
//! shell out to `git`/`docker`; tests fake them.

use async_trait::async_trait;
use thiserror::Error;

/// Errors a repo or container driver can raise.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The shelled-out command exited non-zero.
    #[error("command failed: {0}")]
    CommandFailed(String),
    /// The command could not be spawned at all.
    #[error("spawn failed: {0}")]
    SpawnFailed(String),
}

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Fetches source code onto the local filesystem.
#[async_trait]
pub trait RepoDriver: Send + Sync {
    /// Shallow-clone `repo_url` into `dest_dir`, replacing any existing
    /// contents. Idempotent: safe to call again over a half-finished
    /// clone from a previous attempt.
    async fn clone_shallow(&self, repo_url: &str, dest_dir: &str) -> DriverResult<()>;
}

/// Resource limits applied to a run container.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    /// CPU cores, e.g. `1.0`.
    pub cpus: f64,
    /// Memory ceiling, in mebibytes.
    pub memory_mib: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpus: 1.0,
            memory_mib: 512,
        }
    }
}

/// Live resource usage sampled from a running container.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerStats {
    /// CPU usage, percent of one core.
    pub cpu_usage: f64,
    /// Memory usage, percent of the configured ceiling.
    pub memory_usage: f64,
}

/// Builds and runs containerized replicas.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Build the image `tag` from the Dockerfile in `context_dir`, with
    /// up to `max_attempts` tries spaced `retry_delay`.
    async fn build(
        &self,
        context_dir: &str,
        tag: &str,
        max_attempts: u32,
        retry_delay: std::time::Duration,
    ) -> DriverResult<()>;

    /// Run `tag` as `container_name`, publishing `host_port`, with
    /// `restart=unless-stopped` and the given resource limits.
    async fn run(
        &self,
        tag: &str,
        container_name: &str,
        host_port: u16,
        limits: ResourceLimits,
    ) -> DriverResult<()>;

    /// Stop `container_name`, allowing `grace` before a force-kill.
    async fn stop(&self, container_name: &str, grace: std::time::Duration) -> DriverResult<()>;

    /// Force-remove `container_name`. Idempotent: succeeds even if the
    /// container is already gone.
    async fn remove_container(&self, container_name: &str) -> DriverResult<()>;

    /// Delete the image `tag`. Idempotent.
    async fn remove_image(&self, tag: &str) -> DriverResult<()>;

    /// Current resource usage of a running container, if any.
    async fn stats(&self, container_name: &str) -> DriverResult<ContainerStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeRepoDriver {
        clones: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RepoDriver for FakeRepoDriver {
        async fn clone_shallow(&self, _repo_url: &str, _dest_dir: &str) -> DriverResult<()> {
            self.clones.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_fake_repo_driver_counts_clones() {
        let clones = Arc::new(AtomicUsize::new(0));
        let driver = FakeRepoDriver { clones: clones.clone() };

        driver.clone_shallow("https://github.com/acme/app.git", "/tmp/app").await.unwrap();
        driver.clone_shallow("https://github.com/acme/app.git", "/tmp/app").await.unwrap();

        assert_eq!(clones.load(Ordering::SeqCst), 2);
    }
}
