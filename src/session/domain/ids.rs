//! Strongly-typed identifiers for the session domain.
//!
//! Session identities are opaque strings assigned by the upstream agent, so
//! they are validated only for emptiness. Message and turn identifiers are
//! generated locally as UUID v4 values.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Opaque identity of one resumable conversation.
///
/// The identity is assigned by the upstream agent on the first turn and is
/// immutable afterwards. It is the sole resumption key.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::SessionId;
///
/// let id = SessionId::new("sess-42").expect("non-empty identity");
/// assert_eq!(id.as_str(), "sess-42");
/// assert!(SessionId::new("  ").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

/// Error returned when a session identity is empty or whitespace-only.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session identity must not be empty")]
pub struct EmptySessionIdError;

impl SessionId {
    /// Creates a session identity from an upstream-provided value.
    ///
    /// # Errors
    ///
    /// Returns [`EmptySessionIdError`] if the value is empty after trimming.
    pub fn new(value: impl Into<String>) -> Result<Self, EmptySessionIdError> {
        let raw = value.into();
        if raw.trim().is_empty() {
            return Err(EmptySessionIdError);
        }
        Ok(Self(raw))
    }

    /// Returns the identity as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the continuation token the upstream accepts to resume this
    /// conversation.
    #[must_use]
    pub fn continuation_token(&self) -> ContinuationToken {
        ContinuationToken(self.0.clone())
    }
}

impl TryFrom<String> for SessionId {
    type Error = EmptySessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque upstream-held value enabling resumption of a prior conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContinuationToken(String);

impl ContinuationToken {
    /// Wraps a raw token value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier for a stored message.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::MessageId;
///
/// let id = MessageId::new();
/// assert!(!id.as_ref().is_nil());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a message identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<Uuid> for MessageId {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one user submission through to its terminal event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(Uuid);

impl TurnId {
    /// Creates a new random turn identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for TurnId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Position of a message within its session.
///
/// The first message of a session has sequence `0`; numbers are gapless and
/// strictly increasing, and replay order is sequence order.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::SequenceNumber;
///
/// let first = SequenceNumber::FIRST;
/// assert_eq!(first.value(), 0);
/// assert_eq!(first.next().value(), 1);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    /// Sequence number of the first message in a session.
    pub const FIRST: Self = Self(0);

    /// Creates a sequence number from a value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying sequence value.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Returns the next sequence number, saturating at `u64::MAX`.
    #[must_use]
    pub const fn next(&self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
