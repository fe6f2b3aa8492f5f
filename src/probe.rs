//! Command probes (`EXECUTE_COMMAND`).
//!
//! A probe runs one shell command synchronously and returns its stdout.
//! Every failure maps to [`AppError::Probe`], which the dispatcher reports
//! as `PROBE_ERROR` without closing the session.

use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::{AppError, Result};

/// Decoded probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    /// Shell command line to run.
    pub command: String,
    /// Per-request timeout overriding the configured default.
    pub timeout: Option<Duration>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawProbe {
    Command(String),
    Detailed {
        #[serde(alias = "Command")]
        command: String,
        #[serde(default, alias = "Timeout")]
        timeout: Option<u64>,
    },
}

impl ProbeRequest {
    /// Decode a probe payload.
    ///
    /// Accepts a JSON string, an object `{"command": "...", "timeout": 5}`,
    /// or plain text that is not JSON at all.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Probe`] if the payload is empty, not UTF-8, or
    /// carries an empty command.
    pub fn from_payload(payload: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|err| AppError::Probe(format!("probe payload is not UTF-8: {err}")))?;

        let request = match serde_json::from_str::<RawProbe>(text) {
            Ok(RawProbe::Command(command)) => Self {
                command,
                timeout: None,
            },
            Ok(RawProbe::Detailed { command, timeout }) => Self {
                command,
                timeout: timeout.map(Duration::from_secs),
            },
            Err(_) => Self {
                command: text.to_owned(),
                timeout: None,
            },
        };

        if request.command.trim().is_empty() {
            return Err(AppError::Probe("probe command is empty".into()));
        }
        Ok(request)
    }
}

/// Run a probe and return its stdout.
///
/// # Errors
///
/// Returns [`AppError::Probe`] if the command cannot be launched, times
/// out, or exits unsuccessfully (the message then carries its stderr).
pub async fn execute(config: &ProbeConfig, request: &ProbeRequest) -> Result<String> {
    let limit = request
        .timeout
        .unwrap_or_else(|| Duration::from_secs(config.timeout_seconds));

    let mut cmd = Command::new(&config.shell);
    cmd.arg("-c")
        .arg(&request.command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(limit, cmd.output())
        .await
        .map_err(|_| AppError::Probe(format!("command timed out after {limit:?}")))?
        .map_err(|err| AppError::Probe(format!("failed to run command: {err}")))?;

    debug!(command = %request.command, status = %output.status, "probe finished");

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(AppError::Probe(format!(
            "command exited with {}; stderr: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim_end()
        )))
    }
}
