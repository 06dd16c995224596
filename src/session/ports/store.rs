//! Persistence port for sessions and their messages.
//!
//! The store is the source of truth: live connections hold no state that
//! cannot be rebuilt from it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::session::domain::{
    Message, MessageId, Page, SequenceNumber, SessionId, SessionMetadata, SessionRecord, TurnUsage,
};

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Port for session and message persistence.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `create_message` checks the sequence number, inserts the message and
///   increments `message_count` as one atomic step
/// - `increment_usage` is an atomic add, never a read-modify-write visible
///   to other callers
/// - `list_messages` returns messages in sequence order
/// - `delete_session` removes the session's messages with it
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Returns the session with the given identity, creating an empty
    /// record stamped with `now` if none exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the backend fails.
    async fn get_or_create_session(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRecord>;

    /// Retrieves a session by identity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the backend fails.
    async fn find_session(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>>;

    /// Lists sessions, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the backend fails.
    async fn list_sessions(&self, page: Page) -> StoreResult<Vec<SessionRecord>>;

    /// Appends a finalized message to its session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SessionNotFound`] if the session does not
    /// exist, [`StoreError::SequenceConflict`] if the message's sequence is
    /// not the session's next sequence, or [`StoreError::DuplicateMessage`]
    /// if the message ID is already stored.
    async fn create_message(&self, message: &Message) -> StoreResult<()>;

    /// Lists a session's messages in sequence order.
    ///
    /// Returns an empty vector for unknown sessions.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the backend fails.
    async fn list_messages(&self, id: &SessionId) -> StoreResult<Vec<Message>>;

    /// Adds one turn's cost and token figures to the session totals.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SessionNotFound`] if the session does not exist.
    async fn increment_usage(&self, id: &SessionId, usage: &TurnUsage) -> StoreResult<()>;

    /// Replaces the session's free-form metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SessionNotFound`] if the session does not exist.
    async fn update_metadata(
        &self,
        id: &SessionId,
        metadata: SessionMetadata,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRecord>;

    /// Deletes a session and all of its messages.
    ///
    /// Returns `false` if no such session existed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the backend fails.
    async fn delete_session(&self, id: &SessionId) -> StoreResult<bool>;
}

/// Errors returned by [`SessionStore`] implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The session does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The message does not carry the session's next sequence number.
    #[error("sequence conflict in session {session_id}: expected {expected}, got {actual}")]
    SequenceConflict {
        /// The session whose counter was checked.
        session_id: SessionId,
        /// The sequence the store would accept.
        expected: SequenceNumber,
        /// The sequence carried by the rejected message.
        actual: SequenceNumber,
    },

    /// A message with this ID is already stored.
    #[error("duplicate message: {0}")]
    DuplicateMessage(MessageId),

    /// Stored data could not be converted to or from domain types.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Backend failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps a backend error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }

    /// Creates a serialization error.
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::Serialization(err.to_string())
    }
}
