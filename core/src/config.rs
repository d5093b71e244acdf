// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Configuration management for the orchestrator.
//!
//! Hierarchical, with the following precedence (later wins):
//! 1. Defaults
//! 2. Config file (`./orchestrator.toml`, if present)
//! 3. Environment variables (prefixed `FLEET_ORCHESTRATOR_`)
//!
//! # Examples
//!
//! ```no_run
//! use fleet_orchestrator_core::config::ConfigLoader;
//!
//! let config = ConfigLoader::new().load().expect("valid configuration");
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "orchestrator.toml";

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FLEET_ORCHESTRATOR";

/// Separator for nested configuration keys, e.g.
/// `FLEET_ORCHESTRATOR_SCALING__CPU_THRESHOLD`.
const ENV_SEPARATOR: &str = "__";

/// Scaling-controller tunables, overridable independently of the
/// defaults baked into `ScalingConfig`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ScalingSettings {
    /// Scale-up fires above this average CPU usage.
    pub cpu_threshold: f64,
    /// Seconds between scaling-controller ticks.
    pub check_interval_secs: u64,
    /// Seconds between consecutive scale-ups on one deployment.
    pub scale_up_cooldown_secs: u64,
    /// Seconds between consecutive scale-downs on one deployment.
    pub scale_down_cooldown_secs: u64,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            cpu_threshold: 70.0,
            check_interval_secs: 30,
            scale_up_cooldown_secs: 300,
            scale_down_cooldown_secs: 600,
        }
    }
}

impl From<ScalingSettings> for crate::scaling::ScalingConfig {
    fn from(settings: ScalingSettings) -> Self {
        Self {
            cpu_threshold: settings.cpu_threshold,
            check_interval: chrono::Duration::seconds(settings.check_interval_secs as i64),
            scale_up_cooldown: chrono::Duration::seconds(settings.scale_up_cooldown_secs as i64),
            scale_down_cooldown: chrono::Duration::seconds(settings.scale_down_cooldown_secs as i64),
        }
    }
}

/// Worker-registry tunables.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RegistrySettings {
    /// Seconds without a heartbeat before a worker is considered inactive.
    pub inactive_timeout_secs: u64,
    /// Seconds between inactivity sweeps.
    pub sweep_interval_secs: u64,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            inactive_timeout_secs: 120,
            sweep_interval_secs: 30,
        }
    }
}

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Admin HTTP port.
    pub port: u16,
    /// Worker-side working root (meaningful to `worker-agent`, carried
    /// here so a single config file can serve both binaries).
    pub deployment_path: String,
    /// Worker target URL (meaningful to `worker-agent`).
    pub main_server_url: String,
    /// Scaling-controller tunables.
    pub scaling: ScalingSettings,
    /// Worker-registry tunables.
    pub registry: RegistrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            deployment_path: "./deployments".to_string(),
            main_server_url: "http://localhost:3000".to_string(),
            scaling: ScalingSettings::default(),
            registry: RegistrySettings::default(),
        }
    }
}

/// Configuration loader with builder pattern.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    custom_file: Option<PathBuf>,
    skip_default_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    /// A loader with default settings: looks for `./orchestrator.toml`
    /// and honors `FLEET_ORCHESTRATOR_*` env vars.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use this file instead of the default lookup.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.custom_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Skip the default config-file lookup.
    pub fn skip_default_file(mut self) -> Self {
        self.skip_default_file = true;
        self
    }

    /// Skip environment-variable overrides. Useful in tests.
    pub fn skip_env(mut self) -> Self {
        self.skip_env = true;
        self
    }

    /// Load configuration from defaults, optional file, then env vars.
    pub fn load(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::builder();

        let defaults = Config::default();
        let defaults_json = serde_json::to_value(&defaults).context("serializing defaults")?;
        builder = builder.add_source(config::Config::try_from(&defaults_json)?);

        if !self.skip_default_file {
            let local = PathBuf::from(CONFIG_FILE_NAME);
            if local.exists() {
                tracing::debug!(path = %local.display(), "loading config file");
                builder = builder.add_source(
                    File::from(local).required(false).format(config::FileFormat::Toml),
                );
            }
        }

        if let Some(ref custom_path) = self.custom_file {
            tracing::info!(path = %custom_path.display(), "loading custom config file");
            builder = builder.add_source(
                File::from(custom_path.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        if !self.skip_env {
            builder = builder.add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            );
        }

        let built = builder.build().context("building configuration")?;
        let config: Config = built.try_deserialize().context("deserializing configuration")?;

        if config.scaling.scale_down_cooldown_secs == 0 {
            anyhow::bail!("scaling.scale_down_cooldown_secs must be nonzero");
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_spec() {
        let config = ConfigLoader::new()
            .skip_default_file()
            .skip_env()
            .load()
            .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.deployment_path, "./deployments");
        assert_eq!(config.main_server_url, "http://localhost:3000");
        assert_eq!(config.scaling.cpu_threshold, 70.0);
        assert_eq!(config.registry.inactive_timeout_secs, 120);
    }

    #[test]
    fn test_custom_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "port = 9000\ndeployment_path = \"/data\"\nmain_server_url = \"http://x\"\n\n[scaling]\ncpu_threshold = 70.0\ncheck_interval_secs = 30\nscale_up_cooldown_secs = 300\nscale_down_cooldown_secs = 600\n\n[registry]\ninactive_timeout_secs = 120\nsweep_interval_secs = 30\n").unwrap();

        let config = ConfigLoader::new()
            .with_file(&path)
            .skip_default_file()
            .skip_env()
            .load()
            .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.deployment_path, "/data");
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("FLEET_ORCHESTRATOR_PORT", "8080");
        let config = ConfigLoader::new().skip_default_file().load().unwrap();
        assert_eq!(config.port, 8080);
        std::env::remove_var("FLEET_ORCHESTRATOR_PORT");
    }
}
