//! Stress tool invocation.
//!
//! Builds the `stress-ng` command line for a workload and performs the
//! steady-state check (`stress-ng --version`).

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::params::StressParameters;
use crate::config::StressConfig;
use crate::{AppError, Result};

/// Time allowed for `--version` to answer during the steady-state check.
const VERSION_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Workload arguments for a CPU stress run.
#[must_use]
pub fn workload_args(params: &StressParameters) -> Vec<String> {
    vec![
        "--cpu".into(),
        params.workers.to_string(),
        "--cpu-load".into(),
        params.load.to_string(),
        "--timeout".into(),
        params.timeout.as_secs().to_string(),
    ]
}

/// Build the stress command for `params`, without stdio configuration.
#[must_use]
pub fn command(config: &StressConfig, params: &StressParameters) -> Command {
    let mut cmd = Command::new(&config.binary);
    cmd.args(&config.leading_args).args(workload_args(params));
    cmd
}

/// Verify the stress tool can be invoked, returning its version banner.
///
/// # Errors
///
/// Returns [`AppError::Spawn`] if the binary cannot be launched, does not
/// answer within the check window, or exits unsuccessfully.
pub async fn check_installed(config: &StressConfig) -> Result<String> {
    let mut cmd = Command::new(&config.binary);
    cmd.args(&config.leading_args)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(VERSION_CHECK_TIMEOUT, cmd.output())
        .await
        .map_err(|_| {
            AppError::Spawn(format!(
                "{} --version did not answer within {VERSION_CHECK_TIMEOUT:?}",
                config.binary
            ))
        })?
        .map_err(|err| AppError::Spawn(format!("{} is not invocable: {err}", config.binary)))?;

    if !output.status.success() {
        return Err(AppError::Spawn(format!(
            "{} --version failed with {}; stderr: {}",
            config.binary,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let banner = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    debug!(binary = %config.binary, banner = %banner, "stress tool available");
    Ok(banner)
}
