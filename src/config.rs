//! Runtime configuration parsing and validation.
//!
//! All timing bounds and buffer capacities used by the supervisor and the
//! bootstrap protocol live here so deployments can tune them from a TOML
//! file. Every field has a default; an empty document is a valid config.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::ConfigError;

/// Supervisor tunables: stderr retention and teardown pacing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SupervisorConfig {
    /// Number of recent stderr lines retained for failure reports.
    #[serde(default = "default_stderr_history_lines")]
    pub stderr_history_lines: usize,
    /// Maximum accepted stderr line length in bytes; longer lines are
    /// truncated by the drain codec.
    #[serde(default = "default_max_stderr_line_bytes")]
    pub max_stderr_line_bytes: usize,
    /// Grace period after closing stdin before the process is force-killed.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// How long `attach_recent_stderr` waits for trailing stderr after a
    /// failure before re-surfacing the error.
    #[serde(default = "default_stderr_attach_grace_ms")]
    pub stderr_attach_grace_ms: u64,
}

fn default_stderr_history_lines() -> usize {
    100
}

fn default_max_stderr_line_bytes() -> usize {
    65_536
}

fn default_shutdown_grace_seconds() -> u64 {
    3
}

fn default_stderr_attach_grace_ms() -> u64 {
    500
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stderr_history_lines: default_stderr_history_lines(),
            max_stderr_line_bytes: default_max_stderr_line_bytes(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            stderr_attach_grace_ms: default_stderr_attach_grace_ms(),
        }
    }
}

impl SupervisorConfig {
    /// Shutdown grace period as a [`Duration`].
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Stderr attachment grace period as a [`Duration`].
    #[must_use]
    pub fn stderr_attach_grace(&self) -> Duration {
        Duration::from_millis(self.stderr_attach_grace_ms)
    }
}

/// Bootstrap tunables: probe bound and remote file naming.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BootstrapConfig {
    /// Bound on the architecture probe (boundary echo + `uname` line).
    #[serde(default = "default_probe_timeout_seconds")]
    pub probe_timeout_seconds: u64,
    /// File name of the uploaded agent binary inside the remote temp dir.
    #[serde(default = "default_remote_binary_name")]
    pub remote_binary_name: String,
}

fn default_probe_timeout_seconds() -> u64 {
    10
}

fn default_remote_binary_name() -> String {
    "uplink-agent".into()
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: default_probe_timeout_seconds(),
            remote_binary_name: default_remote_binary_name(),
        }
    }
}

impl BootstrapConfig {
    /// Probe bound as a [`Duration`].
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }
}

/// Top-level runtime configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Supervisor tunables.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Bootstrap tunables.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl RuntimeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)
            .map_err(|err| ConfigError(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.supervisor.stderr_history_lines == 0 {
            return Err(ConfigError(
                "supervisor.stderr_history_lines must be greater than zero".into(),
            ));
        }

        if self.supervisor.max_stderr_line_bytes == 0 {
            return Err(ConfigError(
                "supervisor.max_stderr_line_bytes must be greater than zero".into(),
            ));
        }

        if self.supervisor.shutdown_grace_seconds == 0 {
            return Err(ConfigError(
                "supervisor.shutdown_grace_seconds must be greater than zero".into(),
            ));
        }

        if self.bootstrap.probe_timeout_seconds == 0 {
            return Err(ConfigError(
                "bootstrap.probe_timeout_seconds must be greater than zero".into(),
            ));
        }

        if self.bootstrap.remote_binary_name.is_empty()
            || self.bootstrap.remote_binary_name.contains('/')
        {
            return Err(ConfigError(
                "bootstrap.remote_binary_name must be a bare file name".into(),
            ));
        }

        Ok(())
    }
}
