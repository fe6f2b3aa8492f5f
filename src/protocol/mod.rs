//! Control-channel message protocol.
//!
//! Clients drive the agent with JSON text frames over a WebSocket:
//!
//! ```json
//! {"action": "EXECUTE_EXPERIMENT", "requestID": "r-1", "payload": {"Workers": "2", "Load": "50", "Timeout": "60"}}
//! ```
//!
//! and receive responses of the form:
//!
//! ```json
//! {"type": "ACTION_SUCCESSFUL", "requestID": "r-1"}
//! ```
//!
//! Responses to synchronous actions echo the triggering `requestID`.
//! Completion reports posted by the experiment monitor carry an empty
//! `requestID`.

pub mod codec;

use std::fmt::{Display, Formatter};

/// Control action requested by the client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Verify the stress tool is installed and invocable.
    CheckSteadyState,
    /// Start a stress process in the background.
    ExecuteExperiment,
    /// Verify the running stress process is still alive.
    CheckLiveness,
    /// Run a command probe and return its output.
    ExecuteCommand,
    /// Gracefully stop the stress process and return its output.
    RevertChaos,
    /// Kill the stress process and end the session.
    AbortExperiment,
    /// End the session.
    CloseConnection,
    /// Any action string the agent does not recognise.
    Unknown(String),
}

impl ActionKind {
    /// Map a wire action string onto the closed action set.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CHECK_STEADY_STATE" => Self::CheckSteadyState,
            "EXECUTE_EXPERIMENT" => Self::ExecuteExperiment,
            "CHECK_LIVENESS" => Self::CheckLiveness,
            "EXECUTE_COMMAND" => Self::ExecuteCommand,
            "REVERT_CHAOS" => Self::RevertChaos,
            "ABORT_EXPERIMENT" => Self::AbortExperiment,
            "CLOSE_CONNECTION" => Self::CloseConnection,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Wire representation of the action.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::CheckSteadyState => "CHECK_STEADY_STATE",
            Self::ExecuteExperiment => "EXECUTE_EXPERIMENT",
            Self::CheckLiveness => "CHECK_LIVENESS",
            Self::ExecuteCommand => "EXECUTE_COMMAND",
            Self::RevertChaos => "REVERT_CHAOS",
            Self::AbortExperiment => "ABORT_EXPERIMENT",
            Self::CloseConnection => "CLOSE_CONNECTION",
            Self::Unknown(raw) => raw,
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Response type sent back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseKind {
    /// The action (or a background experiment) completed successfully.
    ActionSuccessful,
    /// The action failed; the session is about to close.
    Error,
    /// A command probe failed; the session keeps listening.
    ProbeError,
    /// The agent is closing the connection.
    CloseConnection,
    /// The requested action is not recognised.
    InvalidAction,
}

impl ResponseKind {
    /// Wire representation of the response type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActionSuccessful => "ACTION_SUCCESSFUL",
            Self::Error => "ERROR",
            Self::ProbeError => "PROBE_ERROR",
            Self::CloseConnection => "CLOSE_CONNECTION",
            Self::InvalidAction => "INVALID_ACTION",
        }
    }

    /// Parse a wire response type; `None` for unknown strings.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ACTION_SUCCESSFUL" => Some(Self::ActionSuccessful),
            "ERROR" => Some(Self::Error),
            "PROBE_ERROR" => Some(Self::ProbeError),
            "CLOSE_CONNECTION" => Some(Self::CloseConnection),
            "INVALID_ACTION" => Some(Self::InvalidAction),
            _ => None,
        }
    }
}

impl Display for ResponseKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Requested action.
    pub action: ActionKind,
    /// Caller-chosen correlation token; empty when the client omitted it.
    pub request_id: String,
    /// Action-specific payload bytes; empty when absent.
    pub payload: Vec<u8>,
}

/// Outbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response type.
    pub kind: ResponseKind,
    /// Correlation token; empty for unsolicited messages.
    pub request_id: String,
    /// Optional response body.
    pub data: Option<String>,
}

impl Response {
    /// Response to a synchronous action, without a body.
    #[must_use]
    pub fn reply(kind: ResponseKind, request_id: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: request_id.into(),
            data: None,
        }
    }

    /// Unsolicited message with an empty `requestID`.
    #[must_use]
    pub fn unsolicited(kind: ResponseKind) -> Self {
        Self::reply(kind, String::new())
    }

    /// Attach a body to the response.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }
}
