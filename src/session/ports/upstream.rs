//! Port for the upstream agent.
//!
//! The agent's reasoning is opaque: this crate only opens connections,
//! forwards user turns and consumes the resulting event stream.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::session::domain::{ContinuationToken, SessionId, StreamEvent};

/// Result type for upstream operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Item produced by an upstream connection.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamEvent {
    /// The upstream assigned (or confirmed) the conversation identity.
    SessionAssigned(SessionId),
    /// A typed partial event of the current turn.
    Stream(StreamEvent),
}

/// Factory for upstream agent connections.
#[async_trait]
pub trait AgentUpstream: Send + Sync {
    /// Opens a connection, resuming a prior conversation when a
    /// continuation token is supplied.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the agent cannot be reached.
    async fn open(
        &self,
        continuation: Option<ContinuationToken>,
    ) -> UpstreamResult<Box<dyn AgentConnection>>;
}

/// One live connection to the upstream agent.
///
/// After [`AgentConnection::send`], [`AgentConnection::next_event`] yields
/// the turn's events in order until a terminal `turn-complete` or
/// `turn-error`. `Ok(None)` means the upstream ended the stream.
#[async_trait]
pub trait AgentConnection: Send {
    /// Submits a user turn.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the turn could not be delivered.
    async fn send(&mut self, text: &str) -> UpstreamResult<()>;

    /// Awaits the next event of the current turn.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the connection fails mid-stream.
    async fn next_event(&mut self) -> UpstreamResult<Option<UpstreamEvent>>;

    /// Releases the connection.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the upstream reports a failure while
    /// closing.
    async fn close(&mut self) -> UpstreamResult<()>;
}

/// Errors raised by upstream connections.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// The connection could not be opened.
    #[error("failed to open upstream connection: {0}")]
    Open(String),

    /// The connection was lost or rejected a request.
    #[error("upstream connection failed: {0}")]
    Connection(String),

    /// Transport-level failure inside the upstream client.
    #[error("upstream client error: {0}")]
    Client(Arc<dyn std::error::Error + Send + Sync>),
}

impl UpstreamError {
    /// Wraps a client library error.
    pub fn client(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Client(Arc::new(err))
    }
}
