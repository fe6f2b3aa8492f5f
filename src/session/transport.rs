//! Frame-level view of a client connection.
//!
//! The session loop only sees a stream of inbound [`Frame`]s and a sink of
//! outbound text frames, so it can run over an upgraded axum [`WebSocket`]
//! or any in-memory pair with the same shape.

use std::pin::Pin;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};

use crate::{AppError, Result};

/// Inbound frame, after control frames are filtered out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// One text message carrying an envelope.
    Text(String),
    /// The peer sent a close frame.
    Closed,
}

/// Inbound half of a connection; `Err` items are read failures.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<Frame>> + Send>>;

/// Outbound half of a connection; closing it closes the connection.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = AppError> + Send>>;

/// Both halves of one client connection.
pub struct Transport {
    /// Frames from the client.
    pub inbound: FrameStream,
    /// Text frames to the client.
    pub outbound: FrameSink,
}

impl Transport {
    /// Assemble a transport from arbitrary halves.
    #[must_use]
    pub fn new(inbound: FrameStream, outbound: FrameSink) -> Self {
        Self { inbound, outbound }
    }

    /// Adapt an upgraded WebSocket.
    ///
    /// Binary frames are read as (lossy) UTF-8 text; ping/pong frames are
    /// handled by axum and skipped here.
    #[must_use]
    pub fn from_websocket(socket: WebSocket) -> Self {
        let (ws_tx, ws_rx) = socket.split();

        let inbound = ws_rx.filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(bytes)) => Some(Ok(Frame::Text(
                    String::from_utf8_lossy(&bytes).into_owned(),
                ))),
                Ok(Message::Close(_)) => Some(Ok(Frame::Closed)),
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Err(err) => Some(Err(AppError::Transport(format!("read failed: {err}")))),
            })
        });

        let outbound = ws_tx
            .with(|text: String| future::ready(Ok::<_, axum::Error>(Message::Text(text.into()))))
            .sink_map_err(|err| AppError::Transport(format!("write failed: {err}")));

        Self::new(Box::pin(inbound), Box::pin(outbound))
    }
}
