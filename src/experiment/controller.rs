//! Process lifecycle controller.
//!
//! `start` is fire-and-forget: it spawns the stress process plus its
//! monitor and returns at once. `revert` and `abort` are synchronous from
//! the session's point of view and wait (bounded) for the process to go
//! away.

use std::process::Stdio;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::monitor::Monitor;
use super::params::StressParameters;
use super::process::{spawn_capture, CapturedOutput, OutputStream, ProcessHandle, ProcessState};
use super::stress;
use crate::config::StressConfig;
use crate::session::outbound::Outbound;
use crate::{AppError, Result};

/// Slack on top of `drain_timeout` before a revert stops waiting for output.
const OUTPUT_SETTLE_MARGIN: Duration = Duration::from_secs(1);

/// Drives stress processes for one session.
#[derive(Debug, Clone)]
pub struct ExperimentController {
    session_id: String,
    config: StressConfig,
}

impl ExperimentController {
    /// Create a controller for `session_id` with the given tool settings.
    #[must_use]
    pub fn new(session_id: impl Into<String>, config: StressConfig) -> Self {
        Self {
            session_id: session_id.into(),
            config,
        }
    }

    /// Stress tool settings.
    #[must_use]
    pub fn config(&self) -> &StressConfig {
        &self.config
    }

    /// Verify the stress tool is invocable.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Spawn`] if the tool is missing or broken.
    pub async fn check_steady_state(&self) -> Result<String> {
        stress::check_installed(&self.config).await
    }

    /// Spawn a stress process and its monitor.
    ///
    /// Completion is reported later through `outbound`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Decode`] if `params` violate their invariants.
    /// - [`AppError::Spawn`] if the process cannot be launched.
    pub fn start(
        &self,
        params: &StressParameters,
        outbound: Arc<Outbound>,
    ) -> Result<ProcessHandle> {
        params.validate()?;

        let mut cmd = stress::command(&self.config, params);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            AppError::Spawn(format!("failed to spawn {}: {err}", self.config.binary))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| AppError::Spawn("stress process exited before its pid was read".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stress stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture stress stderr".into()))?;

        let output = Arc::new(CapturedOutput::new(self.config.output_limit_bytes));
        let captures = vec![
            spawn_capture(pid, stdout, OutputStream::Stdout, Arc::clone(&output)),
            spawn_capture(pid, stderr, OutputStream::Stderr, Arc::clone(&output)),
        ];

        let (state_tx, state_rx) = watch::channel(ProcessState::Running);
        let stop_requested = Arc::new(AtomicBool::new(false));
        let kill = CancellationToken::new();

        Monitor {
            session_id: self.session_id.clone(),
            pid,
            child,
            captures,
            output: Arc::clone(&output),
            state: state_tx,
            stop_requested: Arc::clone(&stop_requested),
            kill: kill.clone(),
            outbound,
            drain_timeout: self.config.drain_timeout(),
        }
        .spawn();

        info!(
            session_id = %self.session_id,
            pid,
            workers = params.workers,
            load = params.load,
            timeout_secs = params.timeout.as_secs(),
            "stress process started"
        );

        Ok(ProcessHandle::new(pid, output, state_rx, stop_requested, kill))
    }

    /// Check that the experiment's process is still alive.
    ///
    /// # Errors
    ///
    /// - [`AppError::Precondition`] if no experiment was started.
    /// - [`AppError::NotRunning`] if the process has exited.
    pub fn check_liveness(&self, handle: Option<&ProcessHandle>) -> Result<()> {
        let handle = handle.ok_or_else(no_experiment)?;

        if let Some(report) = handle.exit_report() {
            return Err(AppError::NotRunning(format!(
                "stress process {} is not running: {}",
                handle.pid(),
                report.detail
            )));
        }

        probe_pid(handle.pid())
    }

    /// Gracefully stop the experiment and return its captured stdout.
    ///
    /// Sends SIGTERM and waits up to `revert_timeout`; a process that
    /// ignores it is killed and waited for up to `abort_timeout`. Reverting
    /// a process that already exited sends no signal and just returns its
    /// output. Either way the returned output is complete once capture has
    /// drained.
    ///
    /// # Errors
    ///
    /// - [`AppError::Precondition`] if no experiment was started.
    /// - [`AppError::Stop`] if signalling fails or the process never exits.
    pub async fn revert(&self, handle: Option<&ProcessHandle>) -> Result<String> {
        let handle = handle.ok_or_else(no_experiment)?;

        if handle.is_running() {
            handle.mark_stop_requested();
            send_terminate(handle)?;

            if handle.wait_for_exit(self.config.revert_timeout()).await.is_none() {
                warn!(
                    session_id = %self.session_id,
                    pid = handle.pid(),
                    grace = ?self.config.revert_timeout(),
                    "stress process ignored SIGTERM, killing"
                );
                handle.request_kill();
                if handle.wait_for_exit(self.config.abort_timeout()).await.is_none() {
                    return Err(AppError::Stop(format!(
                        "stress process {} did not exit after SIGKILL",
                        handle.pid()
                    )));
                }
            }

            info!(session_id = %self.session_id, pid = handle.pid(), "stress process reverted");
        }

        // The monitor gives up on capture after `drain_timeout`.
        let settle = self.config.drain_timeout() + OUTPUT_SETTLE_MARGIN;
        if handle.wait_for_output(settle).await.is_none() {
            warn!(
                session_id = %self.session_id,
                pid = handle.pid(),
                "output capture still running, returning partial output"
            );
        }

        Ok(handle.stdout())
    }

    /// Forcibly terminate the experiment.
    ///
    /// Waits only for the process to be reaped, not for output capture. A
    /// process that already exited is left alone.
    ///
    /// # Errors
    ///
    /// - [`AppError::Precondition`] if no experiment was started.
    /// - [`AppError::Stop`] if the process does not exit after SIGKILL.
    pub async fn abort(&self, handle: Option<&ProcessHandle>) -> Result<()> {
        let handle = handle.ok_or_else(no_experiment)?;

        if !handle.is_running() {
            return Ok(());
        }

        handle.mark_stop_requested();
        handle.request_kill();
        handle
            .wait_for_exit(self.config.abort_timeout())
            .await
            .map(|report| {
                info!(
                    session_id = %self.session_id,
                    pid = handle.pid(),
                    detail = %report.detail,
                    "stress process aborted"
                );
            })
            .ok_or_else(|| {
                AppError::Stop(format!(
                    "stress process {} did not exit after SIGKILL",
                    handle.pid()
                ))
            })
    }
}

fn no_experiment() -> AppError {
    AppError::Precondition("no experiment has been started on this session".into())
}

#[cfg(unix)]
fn send_terminate(handle: &ProcessHandle) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};

    match kill(to_pid(handle.pid())?, Signal::SIGTERM) {
        // Exited between the state check and the signal; the monitor will catch up.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(AppError::Stop(format!(
            "failed to send SIGTERM to {}: {err}",
            handle.pid()
        ))),
    }
}

#[cfg(not(unix))]
fn send_terminate(handle: &ProcessHandle) -> Result<()> {
    handle.request_kill();
    Ok(())
}

#[cfg(unix)]
fn probe_pid(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::kill;

    match kill(to_pid(pid)?, None) {
        // EPERM still proves the process exists.
        Ok(()) | Err(Errno::EPERM) => Ok(()),
        Err(Errno::ESRCH) => Err(AppError::NotRunning(format!(
            "stress process {pid} no longer exists"
        ))),
        Err(err) => Err(AppError::NotRunning(format!(
            "liveness probe for {pid} failed: {err}"
        ))),
    }
}

#[cfg(not(unix))]
fn probe_pid(_pid: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn to_pid(pid: u32) -> Result<nix::unistd::Pid> {
    i32::try_from(pid)
        .map(nix::unistd::Pid::from_raw)
        .map_err(|_| AppError::Stop(format!("pid {pid} out of range")))
}
