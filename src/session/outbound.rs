//! Serialised write path shared by the session loop and experiment monitors.

use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::SinkExt;
use tokio::sync::Mutex;

use super::transport::FrameSink;
use crate::protocol::codec::encode_response;
use crate::protocol::Response;
use crate::{AppError, Result};

/// Write half of a session.
///
/// Every frame is written while holding one async mutex, so concurrent
/// producers never interleave partial writes. The `closed` flag marks the
/// session as logically closed: from then on unsolicited posts are
/// suppressed, while the session loop may still send its final responses
/// until [`Outbound::close`] tears the transport down.
pub struct Outbound {
    sink: Mutex<Option<FrameSink>>,
    closed: AtomicBool,
}

impl Outbound {
    /// Wrap the outbound half of a transport.
    #[must_use]
    pub fn new(sink: FrameSink) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
            closed: AtomicBool::new(false),
        }
    }

    /// Send a response to a synchronous action.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the transport is already closed or
    /// the write fails.
    pub async fn send(&self, response: &Response) -> Result<()> {
        let frame = encode_response(response)?;
        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| AppError::Transport("connection already closed".into()))?;
        sink.send(frame).await
    }

    /// Post an unsolicited message unless the session is closed.
    ///
    /// The closed check and the write happen under the same lock, so a post
    /// never lands after [`Outbound::begin_close`] returns. Returns
    /// `Ok(false)` when the post was suppressed.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if the write fails.
    pub async fn post_unsolicited(&self, response: &Response) -> Result<bool> {
        let frame = encode_response(response)?;
        let mut guard = self.sink.lock().await;
        if self.is_closed() {
            return Ok(false);
        }
        match guard.as_mut() {
            Some(sink) => sink.send(frame).await.map(|()| true),
            None => Ok(false),
        }
    }

    /// Mark the session closed, waiting out any post already in flight.
    pub async fn begin_close(&self) {
        let _guard = self.sink.lock().await;
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Mark the session closed without waiting; for synchronous contexts.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Whether the session has been marked closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Mark the session closed and close the transport. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Transport`] if closing the sink fails.
    pub async fn close(&self) -> Result<()> {
        let sink = {
            let mut guard = self.sink.lock().await;
            self.closed.store(true, Ordering::SeqCst);
            guard.take()
        };
        match sink {
            Some(mut sink) => sink.close().await,
            None => Ok(()),
        }
    }
}
