//! Handle to one spawned stress process and its captured output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of a finished process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    /// Exit code, when the process exited normally.
    pub code: Option<i32>,
    /// Whether the process exited with status zero.
    pub success: bool,
    /// Human-readable exit description.
    pub detail: String,
}

impl ExitReport {
    /// Build a report from the result of waiting on the child.
    #[must_use]
    pub fn from_wait(result: &std::io::Result<std::process::ExitStatus>) -> Self {
        match result {
            Ok(status) => {
                let code = status.code();
                let detail = code.map_or_else(
                    || "process terminated by signal".to_owned(),
                    |c| format!("process exited with code {c}"),
                );
                Self {
                    code,
                    success: status.success(),
                    detail,
                }
            }
            Err(err) => Self {
                code: None,
                success: false,
                detail: format!("wait error: {err}"),
            },
        }
    }
}

/// Lifecycle state published by the monitor task.
///
/// `Exited` is published as soon as the child is reaped; `Drained` follows
/// once output capture has finished (or been abandoned).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    /// The process has not been reaped yet.
    Running,
    /// The process has been reaped; a grandchild may still hold its pipes.
    Exited(ExitReport),
    /// The process has exited and its output is fully captured.
    Drained(ExitReport),
}

impl ProcessState {
    /// Exit report, if the process has exited.
    #[must_use]
    pub fn exit_report(&self) -> Option<&ExitReport> {
        match self {
            Self::Running => None,
            Self::Exited(report) | Self::Drained(report) => Some(report),
        }
    }

    /// Whether captured output is final.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        matches!(self, Self::Drained(_))
    }
}

/// Which child stream a chunk came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

#[derive(Debug, Default)]
struct StreamBuffer {
    bytes: Vec<u8>,
    truncated: bool,
}

/// Bounded stdout/stderr buffers shared between capture tasks and readers.
///
/// Each buffer sits behind its own mutex, so a snapshot never observes a
/// partially appended chunk.
#[derive(Debug)]
pub struct CapturedOutput {
    stdout: Mutex<StreamBuffer>,
    stderr: Mutex<StreamBuffer>,
    limit: usize,
}

impl CapturedOutput {
    /// Create empty buffers holding at most `limit` bytes per stream.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            stdout: Mutex::new(StreamBuffer::default()),
            stderr: Mutex::new(StreamBuffer::default()),
            limit,
        }
    }

    /// Append a chunk, dropping whatever exceeds the limit.
    ///
    /// Returns `true` the first time a stream overflows.
    pub fn append(&self, stream: OutputStream, chunk: &[u8]) -> bool {
        let mut buffer = self
            .buffer(stream)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let room = self.limit.saturating_sub(buffer.bytes.len());
        let take = room.min(chunk.len());
        buffer.bytes.extend_from_slice(&chunk[..take]);

        if take < chunk.len() && !buffer.truncated {
            buffer.truncated = true;
            return true;
        }
        false
    }

    /// Snapshot of captured stdout.
    #[must_use]
    pub fn stdout(&self) -> String {
        self.snapshot(OutputStream::Stdout)
    }

    /// Snapshot of captured stderr.
    #[must_use]
    pub fn stderr(&self) -> String {
        self.snapshot(OutputStream::Stderr)
    }

    fn snapshot(&self, stream: OutputStream) -> String {
        let buffer = self
            .buffer(stream)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&buffer.bytes).into_owned()
    }

    fn buffer(&self, stream: OutputStream) -> &Mutex<StreamBuffer> {
        match stream {
            OutputStream::Stdout => &self.stdout,
            OutputStream::Stderr => &self.stderr,
        }
    }
}

/// Copy a child stream into `output` until EOF.
pub(crate) fn spawn_capture<R>(
    pid: u32,
    mut reader: R,
    stream: OutputStream,
    output: Arc<CapturedOutput>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0_u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => {
                    if output.append(stream, &chunk[..n]) {
                        warn!(pid, ?stream, "captured output limit reached, dropping excess");
                    }
                }
                Err(err) => {
                    warn!(pid, ?stream, %err, "output capture failed");
                    break;
                }
            }
        }
        debug!(pid, ?stream, "output capture finished");
    })
}

/// Session-owned handle to a spawned stress process.
///
/// The child itself is owned by the monitor task; the handle observes it
/// through a [`watch`] channel and requests a kill through a
/// [`CancellationToken`]. Dropping a handle whose process is still running
/// kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    started_at: DateTime<Utc>,
    output: Arc<CapturedOutput>,
    state: watch::Receiver<ProcessState>,
    stop_requested: Arc<AtomicBool>,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub(crate) fn new(
        pid: u32,
        output: Arc<CapturedOutput>,
        state: watch::Receiver<ProcessState>,
        stop_requested: Arc<AtomicBool>,
        kill: CancellationToken,
    ) -> Self {
        Self {
            pid,
            started_at: Utc::now(),
            output,
            state,
            stop_requested,
            kill,
        }
    }

    /// OS process id.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// When the process was spawned.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the process has not been reaped yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*self.state.borrow(), ProcessState::Running)
    }

    /// Exit report, once the process has exited.
    #[must_use]
    pub fn exit_report(&self) -> Option<ExitReport> {
        self.state.borrow().exit_report().cloned()
    }

    /// Snapshot of stdout captured so far.
    #[must_use]
    pub fn stdout(&self) -> String {
        self.output.stdout()
    }

    /// Snapshot of stderr captured so far.
    #[must_use]
    pub fn stderr(&self) -> String {
        self.output.stderr()
    }

    /// Wait up to `limit` for the process to be reaped.
    ///
    /// Returns `None` if it is still running when the wait elapses.
    pub async fn wait_for_exit(&self, limit: Duration) -> Option<ExitReport> {
        self.wait_for_state(limit, |s| !matches!(s, ProcessState::Running))
            .await
    }

    /// Wait up to `limit` for the process to exit and its output capture to
    /// finish.
    ///
    /// Returns `None` if capture is still in progress when the wait elapses.
    pub async fn wait_for_output(&self, limit: Duration) -> Option<ExitReport> {
        self.wait_for_state(limit, ProcessState::is_drained).await
    }

    async fn wait_for_state(
        &self,
        limit: Duration,
        reached: impl FnMut(&ProcessState) -> bool,
    ) -> Option<ExitReport> {
        let mut state = self.state.clone();
        let waited = tokio::time::timeout(limit, state.wait_for(reached)).await;
        match waited {
            Ok(Ok(current)) => current.exit_report().cloned(),
            // The monitor went away without publishing an exit.
            Ok(Err(_)) => Some(ExitReport {
                code: None,
                success: false,
                detail: "monitor stopped before observing exit".into(),
            }),
            Err(_elapsed) => None,
        }
    }

    /// Record that the agent itself is stopping the process.
    pub(crate) fn mark_stop_requested(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Ask the monitor to SIGKILL and reap the process.
    pub(crate) fn request_kill(&self) {
        self.kill.cancel();
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if self.is_running() {
            debug!(pid = self.pid, "process handle dropped while running, killing");
            self.mark_stop_requested();
            self.kill.cancel();
        }
    }
}
