//! JSON envelope codec for control-channel frames.
//!
//! Each WebSocket text frame carries exactly one envelope, so framing is the
//! transport's concern; this module only maps between frame text and the
//! typed [`InboundMessage`] / [`Response`] values.
//!
//! Unknown `action` strings decode successfully as
//! [`ActionKind::Unknown`]; the dispatcher decides how to react.

use serde::{Deserialize, Serialize};

use super::{ActionKind, InboundMessage, Response, ResponseKind};
use crate::{AppError, Result};

/// Inbound envelope as it appears on the wire.
#[derive(Debug, Deserialize)]
struct InboundEnvelope {
    action: String,
    #[serde(rename = "requestID", default)]
    request_id: Option<String>,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

/// Outbound envelope as it appears on the wire.
#[derive(Debug, Serialize, Deserialize)]
struct OutboundEnvelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "requestID", default)]
    request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

/// Decode one inbound text frame.
///
/// `payload` is interpreted as follows:
/// - absent or `null` — empty payload;
/// - a JSON string — the string's UTF-8 bytes;
/// - any other JSON value — its compact JSON encoding.
///
/// # Errors
///
/// Returns [`AppError::MalformedEnvelope`] when the frame is not a JSON
/// object with a string `action` field.
pub fn decode_inbound(frame: &str) -> Result<InboundMessage> {
    let envelope: InboundEnvelope = serde_json::from_str(frame)
        .map_err(|err| AppError::MalformedEnvelope(format!("invalid envelope: {err}")))?;

    let payload = match envelope.payload {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::String(text)) => text.into_bytes(),
        Some(value) => serde_json::to_vec(&value)
            .map_err(|err| AppError::MalformedEnvelope(format!("invalid payload: {err}")))?,
    };

    Ok(InboundMessage {
        action: ActionKind::parse(&envelope.action),
        request_id: envelope.request_id.unwrap_or_default(),
        payload,
    })
}

/// Best-effort recovery of the `requestID` from a frame that failed to decode.
///
/// Lets the error notification for a malformed envelope still carry the
/// caller's correlation token when one is present.
#[must_use]
pub fn salvage_request_id(frame: &str) -> String {
    serde_json::from_str::<serde_json::Value>(frame)
        .ok()
        .and_then(|value| {
            value
                .get("requestID")
                .and_then(serde_json::Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_default()
}

/// Encode a response as one outbound text frame.
///
/// The `requestID` field is always present; `data` is omitted when empty.
///
/// # Errors
///
/// Returns [`AppError::Transport`] if serialisation fails.
pub fn encode_response(response: &Response) -> Result<String> {
    let envelope = OutboundEnvelope {
        kind: response.kind.as_str().to_owned(),
        request_id: response.request_id.clone(),
        data: response.data.clone(),
    };

    serde_json::to_string(&envelope)
        .map_err(|err| AppError::Transport(format!("failed to serialise response: {err}")))
}

/// Decode an outbound frame back into a [`Response`].
///
/// Used by clients of the agent.
///
/// # Errors
///
/// Returns [`AppError::MalformedEnvelope`] for invalid JSON or an unknown
/// response type.
pub fn decode_response(frame: &str) -> Result<Response> {
    let envelope: OutboundEnvelope = serde_json::from_str(frame)
        .map_err(|err| AppError::MalformedEnvelope(format!("invalid response: {err}")))?;

    let kind = ResponseKind::parse(&envelope.kind).ok_or_else(|| {
        AppError::MalformedEnvelope(format!("unknown response type: {}", envelope.kind))
    })?;

    Ok(Response {
        kind,
        request_id: envelope.request_id,
        data: envelope.data,
    })
}
