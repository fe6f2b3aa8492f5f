//! Per-connection session.
//!
//! A [`Session`] owns one client connection for its whole life: it runs the
//! receive loop, hands decoded messages to the [`Dispatcher`], and makes
//! sure the connection is closed (and any running experiment stopped) on
//! every exit path.

pub mod dispatcher;
pub mod outbound;
pub mod transport;

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::protocol::codec;
use crate::Result;

pub use dispatcher::{Dispatcher, Flow, SessionState};
pub use outbound::Outbound;
pub use transport::{Frame, Transport};

/// One client connection and its dispatcher.
pub struct Session {
    id: String,
    inbound: transport::FrameStream,
    outbound: Arc<Outbound>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

/// What woke the receive loop.
enum Wake {
    Shutdown,
    Frame(Option<Result<Frame>>),
}

impl Session {
    /// Create a session over `transport`.
    ///
    /// Cancelling `shutdown` ends the session with a `CLOSE_CONNECTION`
    /// notice.
    #[must_use]
    pub fn new(transport: Transport, config: &GlobalConfig, shutdown: CancellationToken) -> Self {
        let id = Uuid::new_v4().to_string();
        let outbound = Arc::new(Outbound::new(transport.outbound));
        let dispatcher = Dispatcher::new(&id, config, Arc::clone(&outbound));
        Self {
            id,
            inbound: transport.inbound,
            outbound,
            dispatcher,
            shutdown,
        }
    }

    /// Session identifier used in logs.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the receive loop to completion.
    pub async fn run(self) {
        let span = info_span!("session", session_id = %self.id);
        self.receive_loop().instrument(span).await;
    }

    async fn receive_loop(mut self) {
        let mut guard = CloseGuard::new(Arc::clone(&self.outbound));
        info!("session opened");

        loop {
            let wake = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => Wake::Shutdown,
                frame = self.inbound.next() => Wake::Frame(frame),
            };

            let flow = match wake {
                Wake::Shutdown => {
                    info!("agent shutting down, closing session");
                    self.dispatcher.shutdown_notice().await
                }
                Wake::Frame(Some(Ok(Frame::Text(text)))) => match codec::decode_inbound(&text) {
                    Ok(message) => self.dispatcher.dispatch(message).await,
                    Err(err) => {
                        let request_id = codec::salvage_request_id(&text);
                        self.dispatcher.reject_frame(&request_id, &err).await
                    }
                },
                Wake::Frame(Some(Ok(Frame::Closed)) | None) => {
                    info!("client closed the connection");
                    Flow::Close
                }
                Wake::Frame(Some(Err(err))) => self.dispatcher.reject_frame("", &err).await,
            };

            if flow == Flow::Close {
                break;
            }
        }

        self.outbound.begin_close().await;
        self.dispatcher.release().await;
        if let Err(err) = self.outbound.close().await {
            debug!(%err, "transport close failed");
        }
        guard.disarm();
        info!("session closed");
    }
}

/// Closes the connection if the receive loop is unwound or cancelled before
/// reaching its orderly shutdown.
struct CloseGuard {
    outbound: Arc<Outbound>,
    armed: bool,
}

impl CloseGuard {
    fn new(outbound: Arc<Outbound>) -> Self {
        Self {
            outbound,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.outbound.mark_closed();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let outbound = Arc::clone(&self.outbound);
            runtime.spawn(async move {
                if let Err(err) = outbound.close().await {
                    debug!(%err, "transport close failed");
                }
            });
        }
    }
}
