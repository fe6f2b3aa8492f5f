//! Global configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Settings for the external stress tool and the processes it runs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StressConfig {
    /// Stress tool binary (e.g., `stress-ng`).
    #[serde(default = "default_stress_binary")]
    pub binary: String,
    /// Arguments placed before the derived workload arguments.
    #[serde(default)]
    pub leading_args: Vec<String>,
    /// Grace period after SIGTERM before a revert escalates to SIGKILL.
    #[serde(default = "default_revert_timeout")]
    pub revert_timeout_seconds: u64,
    /// Time allowed for a killed process to be reaped.
    #[serde(default = "default_abort_timeout")]
    pub abort_timeout_seconds: u64,
    /// Upper bound on captured bytes per output stream.
    #[serde(default = "default_output_limit")]
    pub output_limit_bytes: usize,
    /// Time the monitor waits for output capture to drain after exit.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            binary: default_stress_binary(),
            leading_args: Vec::new(),
            revert_timeout_seconds: default_revert_timeout(),
            abort_timeout_seconds: default_abort_timeout(),
            output_limit_bytes: default_output_limit(),
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

impl StressConfig {
    /// Grace period granted to SIGTERM during a revert.
    #[must_use]
    pub fn revert_timeout(&self) -> Duration {
        Duration::from_secs(self.revert_timeout_seconds)
    }

    /// Bounded wait for a forcibly killed process.
    #[must_use]
    pub fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_seconds)
    }

    /// Bounded wait for stdout/stderr capture to reach EOF.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_seconds)
    }
}

/// Settings for `EXECUTE_COMMAND` probes.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ProbeConfig {
    /// Shell used to interpret probe commands (invoked as `<shell> -c <cmd>`).
    #[serde(default = "default_probe_shell")]
    pub shell: String,
    /// Default probe timeout when the request does not set one.
    #[serde(default = "default_probe_timeout")]
    pub timeout_seconds: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            shell: default_probe_shell(),
            timeout_seconds: default_probe_timeout(),
        }
    }
}

fn default_stress_binary() -> String {
    "stress-ng".into()
}

fn default_revert_timeout() -> u64 {
    10
}

fn default_abort_timeout() -> u64 {
    5
}

fn default_output_limit() -> usize {
    1_048_576
}

fn default_drain_timeout() -> u64 {
    2
}

fn default_probe_shell() -> String {
    "/bin/sh".into()
}

fn default_probe_timeout() -> u64 {
    30
}

fn default_bind_address() -> String {
    "0.0.0.0".into()
}

fn default_http_port() -> u16 {
    41365
}

fn default_max_message_bytes() -> usize {
    65_536
}

/// Global configuration parsed from `config.toml`.
///
/// Every field has a default, so an empty document is a valid configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port for the HTTP/WebSocket listener.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Largest inbound WebSocket message accepted.
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    /// Stress tool settings.
    #[serde(default)]
    pub stress: StressConfig,
    /// Command probe settings.
    #[serde(default)]
    pub probe: ProbeConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            max_message_bytes: default_max_message_bytes(),
            stress: StressConfig::default(),
            probe: ProbeConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Socket address string the listener binds to.
    #[must_use]
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.http_port)
    }

    /// Check invariants that serde defaults cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.stress.binary.trim().is_empty() {
            return Err(AppError::Config("stress.binary must not be empty".into()));
        }

        if self.probe.shell.trim().is_empty() {
            return Err(AppError::Config("probe.shell must not be empty".into()));
        }

        let positive = [
            ("stress.revert_timeout_seconds", self.stress.revert_timeout_seconds),
            ("stress.abort_timeout_seconds", self.stress.abort_timeout_seconds),
            ("stress.drain_timeout_seconds", self.stress.drain_timeout_seconds),
            ("probe.timeout_seconds", self.probe.timeout_seconds),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(AppError::Config(format!("{name} must be greater than zero")));
        }

        if self.stress.output_limit_bytes == 0 {
            return Err(AppError::Config(
                "stress.output_limit_bytes must be greater than zero".into(),
            ));
        }

        if self.max_message_bytes == 0 {
            return Err(AppError::Config(
                "max_message_bytes must be greater than zero".into(),
            ));
        }

        Ok(())
    }
}
