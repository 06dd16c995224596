//! Transient stream events emitted by the upstream agent during a turn.
//!
//! Events are never persisted as-is; the stream accumulator folds them into
//! content blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TurnUsage;

/// One typed partial event of an in-flight turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamEvent {
    /// Partial reasoning text.
    ReasoningDelta {
        /// The fragment.
        text: String,
    },
    /// Partial answer text.
    ProseDelta {
        /// The fragment.
        text: String,
    },
    /// A complete tool invocation.
    ToolInvocation {
        /// Upstream correlation id.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        /// Tool name.
        name: String,
        /// Structured input.
        input: Value,
    },
    /// A complete tool result.
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
    /// The turn finished normally.
    TurnComplete {
        /// Cost and token figures observed for the turn.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TurnUsage>,
    },
    /// The turn failed upstream.
    TurnError {
        /// Human-readable failure description.
        message: String,
    },
}

impl StreamEvent {
    /// Creates a reasoning delta.
    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    /// Creates a prose delta.
    #[must_use]
    pub fn prose(text: impl Into<String>) -> Self {
        Self::ProseDelta { text: text.into() }
    }

    /// Creates a tool invocation without a correlation id.
    #[must_use]
    pub fn tool_invocation(name: impl Into<String>, input: Value) -> Self {
        Self::ToolInvocation {
            call_id: None,
            name: name.into(),
            input,
        }
    }

    /// Creates a plain-text tool result for the given invocation.
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::ToolResult {
            call_id: Some(call_id.into()),
            content: Value::String(content.into()),
            is_error: false,
        }
    }

    /// Creates a completion event without usage figures.
    #[must_use]
    pub const fn complete() -> Self {
        Self::TurnComplete { usage: None }
    }

    /// Creates a failure event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::TurnError {
            message: message.into(),
        }
    }

    /// Returns `true` for `turn-complete` and `turn-error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::TurnComplete { .. } | Self::TurnError { .. })
    }
}
