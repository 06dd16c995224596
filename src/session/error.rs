//! Error types raised by the session services.
//!
//! Port-level errors live beside their ports; this module holds the
//! service taxonomy that callers of the connection manager observe.

use thiserror::Error;

use super::domain::{Message, SessionId};
use super::ports::{StoreError, TransportError, UpstreamError};

/// Result type for connection manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors returned by the session connection manager.
#[derive(Debug, Clone, Error)]
pub enum ManagerError {
    /// The client channel dropped. The upstream turn keeps running.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The agent connection failed or reported a turn error.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// A turn was submitted while another one is streaming.
    #[error("session {session_id} already has a turn in flight")]
    ConcurrencyViolation {
        /// The busy session.
        session_id: SessionId,
    },

    /// A store write failed; the assembled message is kept for a retry.
    #[error(transparent)]
    Persistence(#[from] StoreError),

    /// The session has no live binding in this process.
    #[error("session {0} is not bound")]
    NotBound(SessionId),

    /// No stored session has this identity.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// The submitted turn text was empty.
    #[error("turn text must not be empty")]
    EmptyTurn,

    /// The process holds its maximum number of live bindings.
    #[error("live session limit of {limit} reached")]
    CapacityExhausted {
        /// Configured maximum.
        limit: usize,
    },

    /// A finalized message is waiting for `retry_finalize`.
    #[error("session {0} has an unstored turn; retry finalize first")]
    CommitPending(SessionId),

    /// There is nothing staged for `retry_finalize`.
    #[error("session {0} has no pending commit")]
    NothingPending(SessionId),

    /// The manager is shutting down and accepts no new work.
    #[error("session manager is shutting down")]
    ShuttingDown,
}

impl ManagerError {
    /// Returns `true` for errors that reject a request without changing
    /// session state.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyViolation { .. }
                | Self::EmptyTurn
                | Self::NotBound(_)
                | Self::CommitPending(_)
                | Self::CapacityExhausted { .. }
        )
    }
}

/// A turn that ended without `turn-complete`.
///
/// The partial message, possibly with no content, is still a durable
/// record of the turn and must be stored.
#[derive(Debug, Clone, Error)]
#[error("turn failed: {reason}")]
pub struct TurnFailed {
    /// Failure description reported upstream or inferred from stream loss.
    pub reason: String,
    /// The partial assistant message, marked failed.
    pub partial: Box<Message>,
}

impl TurnFailed {
    /// Returns the partial message.
    #[must_use]
    pub fn into_partial(self) -> Message {
        *self.partial
    }
}
