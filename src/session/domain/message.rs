//! The Message aggregate: one finalized, immutable entry of session history.
//!
//! User messages are created when a turn is submitted; assistant messages
//! are created when the stream for that turn is finalized.

use super::{ContentBlock, MessageId, Role, SequenceNumber, SessionId, TurnId, TurnUsage};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stored message within a session.
///
/// # Invariants
///
/// - belongs to exactly one session
/// - `sequence_number` is unique and gapless within that session
/// - immutable after construction
///
/// # Examples
///
/// ```
/// use palaver::session::domain::{Message, SequenceNumber, SessionId};
/// use mockable::DefaultClock;
///
/// let session = SessionId::new("sess-1").expect("valid id");
/// let message = Message::user(session, SequenceNumber::FIRST, "hello", &DefaultClock);
/// assert_eq!(message.text(), "hello");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    session_id: SessionId,
    sequence_number: SequenceNumber,
    role: Role,
    content: Vec<ContentBlock>,
    #[serde(default)]
    metadata: MessageMetadata,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    usage: Option<TurnUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
}

impl Message {
    /// Creates a user message holding the submitted text as a prose block.
    #[must_use]
    pub fn user(
        session_id: SessionId,
        sequence_number: SequenceNumber,
        text: impl Into<String>,
        clock: &impl Clock,
    ) -> Self {
        Self::builder(session_id, Role::User, sequence_number)
            .with_block(ContentBlock::prose(text))
            .build(clock)
    }

    /// Returns a builder for constructing messages with metadata.
    #[must_use]
    pub const fn builder(
        session_id: SessionId,
        role: Role,
        sequence_number: SequenceNumber,
    ) -> MessageBuilder {
        MessageBuilder::new(session_id, role, sequence_number)
    }

    /// Reconstructs a message from persisted fields.
    #[must_use]
    pub fn from_persisted(data: PersistedMessageData) -> Self {
        Self {
            id: data.id,
            session_id: data.session_id,
            sequence_number: data.sequence_number,
            role: data.role,
            content: data.content,
            metadata: data.metadata,
            created_at: data.created_at,
            usage: data.usage,
            duration_ms: data.duration_ms,
        }
    }

    /// Returns the message identifier.
    #[must_use]
    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Returns the owning session.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the sequence number.
    #[must_use]
    pub const fn sequence_number(&self) -> SequenceNumber {
        self.sequence_number
    }

    /// Returns the message role.
    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    /// Returns the content blocks in order.
    #[must_use]
    pub fn content(&self) -> &[ContentBlock] {
        &self.content
    }

    /// Returns the metadata.
    #[must_use]
    pub const fn metadata(&self) -> &MessageMetadata {
        &self.metadata
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the usage reported for the turn that produced this message.
    #[must_use]
    pub const fn usage(&self) -> Option<&TurnUsage> {
        self.usage.as_ref()
    }

    /// Returns how long the turn took to stream, in milliseconds.
    #[must_use]
    pub const fn duration_ms(&self) -> Option<u64> {
        self.duration_ms
    }

    /// Returns the concatenated prose text of the message.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Prose(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Persisted fields used to rebuild a [`Message`] from storage.
#[derive(Debug, Clone)]
pub struct PersistedMessageData {
    /// Message identifier.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Position within the session.
    pub sequence_number: SequenceNumber,
    /// Author.
    pub role: Role,
    /// Content blocks.
    pub content: Vec<ContentBlock>,
    /// Metadata.
    pub metadata: MessageMetadata,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Usage figures, if reported.
    pub usage: Option<TurnUsage>,
    /// Streaming duration, if measured.
    pub duration_ms: Option<u64>,
}

/// Builder for [`Message`].
#[derive(Debug)]
pub struct MessageBuilder {
    id: Option<MessageId>,
    session_id: SessionId,
    sequence_number: SequenceNumber,
    role: Role,
    content: Vec<ContentBlock>,
    metadata: MessageMetadata,
    usage: Option<TurnUsage>,
    duration_ms: Option<u64>,
}

impl MessageBuilder {
    /// Creates a new builder.
    #[must_use]
    pub const fn new(session_id: SessionId, role: Role, sequence_number: SequenceNumber) -> Self {
        Self {
            id: None,
            session_id,
            sequence_number,
            role,
            content: Vec::new(),
            metadata: MessageMetadata::empty(),
            usage: None,
            duration_ms: None,
        }
    }

    /// Sets a specific message ID.
    #[must_use]
    pub const fn with_id(mut self, id: MessageId) -> Self {
        self.id = Some(id);
        self
    }

    /// Appends a content block.
    #[must_use]
    pub fn with_block(mut self, block: ContentBlock) -> Self {
        self.content.push(block);
        self
    }

    /// Appends several content blocks.
    #[must_use]
    pub fn with_blocks(mut self, blocks: impl IntoIterator<Item = ContentBlock>) -> Self {
        self.content.extend(blocks);
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Attaches usage figures.
    #[must_use]
    pub const fn with_usage(mut self, usage: Option<TurnUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Attaches the streaming duration.
    #[must_use]
    pub const fn with_duration_ms(mut self, duration_ms: Option<u64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Builds the message, timestamping it with the given clock.
    ///
    /// Empty content is allowed: a failed turn that produced nothing is
    /// still recorded.
    #[must_use]
    pub fn build(self, clock: &impl Clock) -> Message {
        Message {
            id: self.id.unwrap_or_default(),
            session_id: self.session_id,
            sequence_number: self.sequence_number,
            role: self.role,
            content: self.content,
            metadata: self.metadata,
            created_at: clock.utc(),
            usage: self.usage,
            duration_ms: self.duration_ms,
        }
    }
}

/// Metadata recorded with a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageMetadata {
    /// Turn that produced the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<TurnId>,
    /// Terminal status of the turn, for assistant messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TurnStatus>,
    /// Failure description when the turn did not complete.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl MessageMetadata {
    /// Creates empty metadata.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            turn_id: None,
            status: None,
            error: None,
        }
    }

    /// Sets the turn identifier.
    #[must_use]
    pub const fn with_turn_id(mut self, turn_id: TurnId) -> Self {
        self.turn_id = Some(turn_id);
        self
    }

    /// Marks the turn as completed.
    #[must_use]
    pub fn completed(mut self) -> Self {
        self.status = Some(TurnStatus::Completed);
        self.error = None;
        self
    }

    /// Marks the turn as failed with a reason.
    #[must_use]
    pub fn failed(mut self, reason: impl Into<String>) -> Self {
        self.status = Some(TurnStatus::Failed);
        self.error = Some(reason.into());
        self
    }

    /// Returns `true` if the turn was recorded as failed.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self.status, Some(TurnStatus::Failed))
    }
}

/// Terminal status of an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The upstream signalled completion.
    Completed,
    /// The upstream failed or the stream ended early.
    Failed,
}

impl fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}
