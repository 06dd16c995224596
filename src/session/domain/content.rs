//! Content block types representing one unit of assistant output.
//!
//! An assistant message is an ordered list of blocks. Adjacent reasoning or
//! prose fragments streamed back to back are merged into a single block;
//! tool invocations and tool results always occupy a block of their own.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A single typed unit of message content.
///
/// # Serialisation
///
/// Blocks are serialised with a `type` tag field:
///
/// ```json
/// { "type": "prose", "text": "Hello!" }
/// { "type": "tool_invocation", "name": "Search", "input": {"q": "x"} }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Internal, non-final reasoning text.
    Reasoning(TextBlock),
    /// User-facing answer text.
    Prose(TextBlock),
    /// A structured tool invocation issued by the agent.
    ToolInvocation(ToolInvocationBlock),
    /// The output of a tool invocation.
    ToolResult(ToolResultBlock),
}

impl ContentBlock {
    /// Creates a reasoning block.
    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning(TextBlock::new(text))
    }

    /// Creates a prose block.
    #[must_use]
    pub fn prose(text: impl Into<String>) -> Self {
        Self::Prose(TextBlock::new(text))
    }

    /// Returns the kind of this block.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        match self {
            Self::Reasoning(_) => BlockKind::Reasoning,
            Self::Prose(_) => BlockKind::Prose,
            Self::ToolInvocation(_) => BlockKind::ToolInvocation,
            Self::ToolResult(_) => BlockKind::ToolResult,
        }
    }

    /// Returns the text of a reasoning or prose block.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Reasoning(block) | Self::Prose(block) => Some(&block.text),
            Self::ToolInvocation(_) | Self::ToolResult(_) => None,
        }
    }
}

/// Discriminant of a [`ContentBlock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// Reasoning fragment.
    Reasoning,
    /// Prose fragment.
    Prose,
    /// Tool invocation.
    ToolInvocation,
    /// Tool result.
    ToolResult,
}

impl BlockKind {
    /// Returns `true` for the text kinds that merge across adjacent deltas.
    #[must_use]
    pub const fn is_mergeable(self) -> bool {
        matches!(self, Self::Reasoning | Self::Prose)
    }

    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Prose => "prose",
            Self::ToolInvocation => "tool_invocation",
            Self::ToolResult => "tool_result",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free text carried by a reasoning or prose block.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::TextBlock;
///
/// let mut block = TextBlock::new("Hi");
/// block.append(" there");
/// assert_eq!(block.text, "Hi there");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBlock {
    /// The accumulated text.
    pub text: String,
}

impl TextBlock {
    /// Creates a text block.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Appends a streamed fragment.
    pub fn append(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }
}

/// A tool invocation within an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationBlock {
    /// Upstream correlation id used to match the eventual result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Name of the invoked tool.
    pub name: String,
    /// Structured input payload.
    pub input: Value,
    /// Specialised shape recognised from the tool name, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub convention: Option<ToolConvention>,
}

impl ToolInvocationBlock {
    /// Creates a generic tool invocation.
    #[must_use]
    pub fn new(name: impl Into<String>, input: Value) -> Self {
        Self {
            call_id: None,
            name: name.into(),
            input,
            convention: None,
        }
    }

    /// Sets the upstream correlation id.
    #[must_use]
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Attaches a recognised convention.
    #[must_use]
    pub fn with_convention(mut self, convention: ToolConvention) -> Self {
        self.convention = Some(convention);
        self
    }
}

/// Specialised payloads for tool names that follow a known convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolConvention {
    /// The agent published its working task list.
    TaskList {
        /// Tasks in the order the agent listed them.
        tasks: Vec<TaskItem>,
    },
}

/// One entry of a task-list tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    /// Imperative description of the task.
    pub content: String,
    /// Progress state.
    pub status: TaskStatus,
    /// Present-continuous form shown while the task is running.
    #[serde(
        default,
        rename = "activeForm",
        alias = "active_form",
        skip_serializing_if = "Option::is_none"
    )]
    pub active_form: Option<String>,
}

/// Progress state of a [`TaskItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

/// A tool result within an assistant message.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::ToolResultBlock;
///
/// let result = ToolResultBlock::text("3 matches").with_call_id("call-1");
/// assert!(!result.is_error);
/// assert_eq!(result.call_id.as_deref(), Some("call-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// Correlation id of the originating invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Result payload, plain text as a JSON string or structured JSON.
    pub content: Value,
    /// Whether the tool reported an error.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    /// Creates a successful plain-text result.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self::structured(Value::String(content.into()))
    }

    /// Creates a successful structured result.
    #[must_use]
    pub const fn structured(content: Value) -> Self {
        Self {
            call_id: None,
            content,
            is_error: false,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    /// Marks the result as an error.
    #[must_use]
    pub const fn as_error(mut self) -> Self {
        self.is_error = true;
        self
    }
}
