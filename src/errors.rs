//! Error types shared across the agent.

use std::fmt::{Display, Formatter};

/// Shared agent result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Agent error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// WebSocket read or write failure.
    Transport(String),
    /// Inbound envelope could not be decoded.
    MalformedEnvelope(String),
    /// Action-specific payload is invalid.
    Decode(String),
    /// Action requires an experiment that has not been started.
    Precondition(String),
    /// An experiment is already running on this session.
    Conflict(String),
    /// The operating system refused to launch the stress process.
    Spawn(String),
    /// The stress process could not be stopped.
    Stop(String),
    /// The stress process has already exited.
    NotRunning(String),
    /// The client sent an action the agent does not recognise.
    InvalidAction(String),
    /// Command probe failed; reported to the client without closing.
    Probe(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether this error ends the session once reported.
    ///
    /// Only command probe failures leave the session listening.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Probe(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::MalformedEnvelope(msg) => write!(f, "malformed envelope: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Precondition(msg) => write!(f, "precondition: {msg}"),
            Self::Conflict(msg) => write!(f, "conflict: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Stop(msg) => write!(f, "stop: {msg}"),
            Self::NotRunning(msg) => write!(f, "not running: {msg}"),
            Self::InvalidAction(msg) => write!(f, "invalid action: {msg}"),
            Self::Probe(msg) => write!(f, "probe: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("invalid json: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
