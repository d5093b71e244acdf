// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shell-backed `RepoDriver`/`ContainerDriver` implementations: `git`
//! and `docker` invoked as subprocesses.

use async_trait::async_trait;
use fleet_orchestrator_core::agent::{ContainerDriver, ContainerStats, DriverError, DriverResult, RepoDriver, ResourceLimits};
use tokio::process::Command;
use tracing::{debug, warn};

async fn run(mut command: Command) -> DriverResult<String> {
    let output = command
        .output()
        .await
        .map_err(|err| DriverError::SpawnFailed(err.to_string()))?;

    if !output.status.success() {
        return Err(DriverError::CommandFailed(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Clones repositories by shelling out to `git`.
pub struct ShellRepoDriver;

#[async_trait]
impl RepoDriver for ShellRepoDriver {
    async fn clone_shallow(&self, repo_url: &str, dest_dir: &str) -> DriverResult<()> {
        let _ = tokio::fs::remove_dir_all(dest_dir).await;
        tokio::fs::create_dir_all(dest_dir)
            .await
            .map_err(|err| DriverError::SpawnFailed(err.to_string()))?;

        let mut command = Command::new("git");
        command.args(["clone", "--depth", "1", repo_url, dest_dir]);
        run(command).await?;
        Ok(())
    }
}

/// Builds and runs containers by shelling out to `docker`.
pub struct ShellContainerDriver;

#[async_trait]
impl ContainerDriver for ShellContainerDriver {
    async fn build(
        &self,
        context_dir: &str,
        tag: &str,
        max_attempts: u32,
        retry_delay: std::time::Duration,
    ) -> DriverResult<()> {
        let mut last_err = None;
        for attempt in 1..=max_attempts {
            let mut command = Command::new("docker");
            command.args(["build", "-t", tag, context_dir]);
            match run(command).await {
                Ok(_) => return Ok(()),
                Err(err) => {
                    warn!(attempt, %tag, %err, "image build attempt failed");
                    last_err = Some(err);
                    if attempt < max_attempts {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DriverError::CommandFailed("build failed".to_string())))
    }

    async fn run(
        &self,
        tag: &str,
        container_name: &str,
        host_port: u16,
        limits: ResourceLimits,
    ) -> DriverResult<()> {
        let port_mapping = format!("{host_port}:{host_port}");
        let cpus = limits.cpus.to_string();
        let memory = format!("{}m", limits.memory_mib);

        let mut command = Command::new("docker");
        command.args([
            "run",
            "-d",
            "--name",
            container_name,
            "--restart",
            "unless-stopped",
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "-p",
            &port_mapping,
            "-e",
            &format!("PORT={host_port}"),
            tag,
        ]);
        run(command).await?;
        Ok(())
    }

    async fn stop(&self, container_name: &str, grace: std::time::Duration) -> DriverResult<()> {
        let mut command = Command::new("docker");
        command.args(["stop", "-t", &grace.as_secs().to_string(), container_name]);
        debug!(%container_name, "stopping container");
        let _ = run(command).await;
        Ok(())
    }

    async fn remove_container(&self, container_name: &str) -> DriverResult<()> {
        let mut command = Command::new("docker");
        command.args(["rm", "-f", container_name]);
        let _ = run(command).await;
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> DriverResult<()> {
        let mut command = Command::new("docker");
        command.args(["rmi", "-f", tag]);
        let _ = run(command).await;
        Ok(())
    }

    async fn stats(&self, container_name: &str) -> DriverResult<ContainerStats> {
        let mut command = Command::new("docker");
        command.args([
            "stats",
            "--no-stream",
            "--format",
            "{{.CPUPerc}},{{.MemPerc}}",
            container_name,
        ]);
        let output = run(command).await?;
        parse_stats(&output)
    }
}

fn parse_stats(line: &str) -> DriverResult<ContainerStats> {
    let (cpu, mem) = line
        .split_once(',')
        .ok_or_else(|| DriverError::CommandFailed(format!("unexpected docker stats output: {line}")))?;

    let parse_percent = |s: &str| -> DriverResult<f64> {
        s.trim()
            .trim_end_matches('%')
            .parse::<f64>()
            .map_err(|_| DriverError::CommandFailed(format!("unparseable percentage: {s}")))
    };

    Ok(ContainerStats {
        cpu_usage: parse_percent(cpu)?,
        memory_usage: parse_percent(mem)?,
    })
}
