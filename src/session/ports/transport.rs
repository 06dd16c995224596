//! Port for the client-facing bidirectional channel.
//!
//! Frames are message-shaped: each inbound frame is either a new turn or a
//! resume request, each outbound frame is one discrete update. On the wire
//! every frame is a JSON object tagged by `kind`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::domain::{Message, SessionId, ToolConvention};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// A request decoded from the client.
///
/// ```json
/// {"kind": "new-turn", "text": "hello"}
/// {"kind": "resume", "sessionId": "sess-1"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum InboundFrame {
    /// Submit a user turn.
    NewTurn {
        /// The turn text.
        text: String,
    },
    /// Bind this channel to an existing session and replay its history.
    Resume {
        /// The session to resume.
        session_id: SessionId,
    },
}

/// Kind of text carried by a delta frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeltaKind {
    /// Reasoning fragment.
    Reasoning,
    /// Prose fragment.
    Prose,
}

/// An update sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum OutboundFrame {
    /// Stored history, sent once on resume before any live event.
    History {
        /// Messages in sequence order.
        messages: Vec<Message>,
    },
    /// The upstream assigned an identity to a new session.
    SessionBound {
        /// The identity to persist client-side for resumption.
        session_id: SessionId,
    },
    /// A streamed text fragment; carries only the fragment, never the total.
    Delta {
        /// Reasoning or prose.
        content_type: DeltaKind,
        /// The fragment.
        text: String,
    },
    /// A tool invocation block.
    ToolInvocation {
        /// Upstream correlation id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Tool name.
        name: String,
        /// Structured input.
        input: Value,
        /// Recognised specialised shape.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        convention: Option<ToolConvention>,
    },
    /// A tool result block.
    ToolResult {
        /// Correlation id of the originating invocation.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Output payload.
        content: Value,
        /// Whether the tool reported an error.
        #[serde(default)]
        is_error: bool,
    },
    /// The turn finished and its message is durable.
    TurnComplete,
    /// The turn failed or a request was rejected.
    TurnError {
        /// Human-readable description.
        message: String,
    },
}

/// Errors surfaced by a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The channel was dropped by the peer.
    #[error("transport disconnected")]
    Disconnected,

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// A bidirectional, order-preserving channel to one client.
#[async_trait]
pub trait Transport: Send {
    /// Sends one frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] if the peer is gone.
    async fn send(&mut self, frame: OutboundFrame) -> TransportResult<()>;

    /// Awaits the next inbound frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Disconnected`] when the channel closes and
    /// [`TransportError::Malformed`] for a frame that does not decode.
    async fn recv(&mut self) -> TransportResult<InboundFrame>;
}

/// Encodes an outbound frame as one JSON text frame.
///
/// # Errors
///
/// Returns [`TransportError::Malformed`] if the frame holds data that
/// cannot be represented as JSON.
pub fn encode_outbound(frame: &OutboundFrame) -> TransportResult<String> {
    serde_json::to_string(frame).map_err(|e| TransportError::Malformed(e.to_string()))
}

/// Decodes one JSON text frame from the client.
///
/// # Errors
///
/// Returns [`TransportError::Malformed`] if the text is not a known frame.
///
/// # Examples
///
/// ```
/// use palaver::session::ports::transport::{InboundFrame, decode_inbound};
///
/// let frame = decode_inbound(r#"{"kind":"new-turn","text":"hello"}"#).expect("valid frame");
/// assert_eq!(frame, InboundFrame::NewTurn { text: "hello".to_owned() });
/// ```
pub fn decode_inbound(text: &str) -> TransportResult<InboundFrame> {
    serde_json::from_str(text).map_err(|e| TransportError::Malformed(e.to_string()))
}

/// Encodes an inbound frame; the client side of [`decode_inbound`].
///
/// # Errors
///
/// Returns [`TransportError::Malformed`] if serialisation fails.
pub fn encode_inbound(frame: &InboundFrame) -> TransportResult<String> {
    serde_json::to_string(frame).map_err(|e| TransportError::Malformed(e.to_string()))
}

/// Decodes an outbound frame; the client side of [`encode_outbound`].
///
/// # Errors
///
/// Returns [`TransportError::Malformed`] if the text is not a known frame.
pub fn decode_outbound(text: &str) -> TransportResult<OutboundFrame> {
    serde_json::from_str(text).map_err(|e| TransportError::Malformed(e.to_string()))
}
