//! Background completion monitor for a stress process.
//!
//! One monitor task is spawned per started experiment. It owns the
//! [`Child`], waits for it to exit (or kills it when the handle asks),
//! publishes the exit through the handle's watch channel, drains output
//! capture and publishes that too, and finally posts an unsolicited
//! completion report to the session unless the session has already closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::process::{CapturedOutput, ExitReport, ProcessState};
use crate::protocol::{Response, ResponseKind};
use crate::session::outbound::Outbound;

/// Everything the monitor needs, moved into its task.
pub(crate) struct Monitor {
    pub(crate) session_id: String,
    pub(crate) pid: u32,
    pub(crate) child: Child,
    pub(crate) captures: Vec<JoinHandle<()>>,
    pub(crate) output: Arc<CapturedOutput>,
    pub(crate) state: watch::Sender<ProcessState>,
    pub(crate) stop_requested: Arc<AtomicBool>,
    pub(crate) kill: CancellationToken,
    pub(crate) outbound: Arc<Outbound>,
    pub(crate) drain_timeout: Duration,
}

impl Monitor {
    /// Spawn the monitor onto the runtime.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let span = info_span!("experiment_monitor", session_id = %self.session_id, pid = self.pid);
        tokio::spawn(self.run().instrument(span))
    }

    async fn run(mut self) {
        let started = Utc::now();

        let waited = tokio::select! {
            result = self.child.wait() => Some(result),
            () = self.kill.cancelled() => None,
        };

        let result = match waited {
            Some(result) => result,
            None => {
                info!("kill requested, terminating stress process");
                if let Err(err) = self.child.start_kill() {
                    warn!(%err, "failed to signal stress process");
                }
                self.child.wait().await
            }
        };
        let report = ExitReport::from_wait(&result);

        let elapsed = Utc::now() - started;
        info!(
            detail = %report.detail,
            success = report.success,
            monitored_ms = elapsed.num_milliseconds(),
            "stress process exited"
        );
        // The pid is released from here on.
        self.state.send_replace(ProcessState::Exited(report.clone()));

        let captures = std::mem::take(&mut self.captures);
        let aborts: Vec<_> = captures.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.drain_timeout, futures_util::future::join_all(captures))
            .await
            .is_err()
        {
            // A grandchild may still hold the pipes open.
            warn!("output capture did not drain in time, abandoning it");
            for abort in aborts {
                abort.abort();
            }
        }

        self.state.send_replace(ProcessState::Drained(report.clone()));

        let stop_requested = self.stop_requested.load(Ordering::SeqCst);
        let response = completion_response(&report, stop_requested, &self.output);
        match self.outbound.post_unsolicited(&response).await {
            Ok(true) => debug!(kind = %response.kind, "completion reported"),
            Ok(false) => debug!("session closed, completion report suppressed"),
            Err(err) => warn!(%err, "failed to deliver completion report"),
        }
    }
}

/// Build the unsolicited completion report for an exited process.
///
/// A clean exit, or an exit the agent requested through a revert, reports
/// `ACTION_SUCCESSFUL` with captured stdout; any other exit reports `ERROR`
/// with the exit detail and captured stderr.
#[must_use]
pub fn completion_response(
    report: &ExitReport,
    stop_requested: bool,
    output: &CapturedOutput,
) -> Response {
    if report.success || stop_requested {
        Response::unsolicited(ResponseKind::ActionSuccessful).with_data(output.stdout())
    } else {
        Response::unsolicited(ResponseKind::Error).with_data(format!(
            "stress process failed during execution, err: {}; stderr: {}",
            report.detail,
            output.stderr().trim_end()
        ))
    }
}
