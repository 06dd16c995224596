//! Drives one client transport against the session manager.
//!
//! The driver owns the channel's state machine
//! (`Unbound -> Creating -> Bound -> Closed`), replays history as a single
//! `history` frame before reading further input, and forwards turn updates
//! as frames. Losing the transport detaches; the upstream turn keeps
//! running.

use mockable::Clock;
use tracing::{debug, info};

use super::manager::SessionManager;
use super::turn::{TurnStream, TurnUpdate};
use crate::session::{
    domain::SessionId,
    ports::{
        store::SessionStore,
        transport::{InboundFrame, OutboundFrame, Transport, TransportError, TransportResult},
        upstream::AgentUpstream,
    },
};

/// Binding state of one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// No session yet.
    Unbound,
    /// The first turn was forwarded; waiting for the upstream identity.
    Creating,
    /// Bound to a session.
    Bound(SessionId),
    /// The transport is gone.
    Closed,
}

/// How a channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelExit {
    /// The session the channel was bound to, if any.
    pub session_id: Option<SessionId>,
    /// Whether a turn was still streaming when the channel detached.
    pub turn_in_flight: bool,
}

enum Step {
    Inbound(TransportResult<InboundFrame>),
    Update(Option<TurnUpdate>),
}

/// One client's channel bound to the session manager.
pub struct SessionChannel<T, S, U, K>
where
    T: Transport,
    S: SessionStore + 'static,
    U: AgentUpstream + 'static,
    K: Clock + Send + Sync + 'static,
{
    transport: T,
    manager: SessionManager<S, U, K>,
    state: ChannelState,
    turn: Option<TurnStream>,
}

impl<T, S, U, K> SessionChannel<T, S, U, K>
where
    T: Transport,
    S: SessionStore + 'static,
    U: AgentUpstream + 'static,
    K: Clock + Send + Sync + 'static,
{
    /// Creates an unbound channel.
    #[must_use]
    pub const fn new(manager: SessionManager<S, U, K>, transport: T) -> Self {
        Self {
            transport,
            manager,
            state: ChannelState::Unbound,
            turn: None,
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &ChannelState {
        &self.state
    }

    /// Serves the channel until the transport is lost.
    pub async fn run(mut self) -> ChannelExit {
        loop {
            let step = match self.turn.as_mut() {
                Some(turn) => tokio::select! {
                    update = turn.next() => Step::Update(update),
                    inbound = self.transport.recv() => Step::Inbound(inbound),
                },
                None => Step::Inbound(self.transport.recv().await),
            };

            let outcome = match step {
                Step::Update(Some(update)) => self.forward(update).await,
                Step::Update(None) => {
                    self.turn = None;
                    if self.state == ChannelState::Creating {
                        self.state = ChannelState::Unbound;
                    }
                    Ok(())
                }
                Step::Inbound(Ok(frame)) => self.handle(frame).await,
                Step::Inbound(Err(TransportError::Malformed(reason))) => {
                    self.reject(format!("malformed frame: {reason}")).await
                }
                Step::Inbound(Err(TransportError::Disconnected)) => {
                    Err(TransportError::Disconnected)
                }
            };

            if outcome.is_err() {
                return self.detach();
            }
        }
    }

    async fn handle(&mut self, frame: InboundFrame) -> TransportResult<()> {
        match frame {
            InboundFrame::NewTurn { text } => self.new_turn(&text).await,
            InboundFrame::Resume { session_id } => self.resume(session_id).await,
        }
    }

    async fn new_turn(&mut self, text: &str) -> TransportResult<()> {
        match self.state.clone() {
            ChannelState::Unbound => match self.manager.open_session(text).await {
                Ok(stream) => {
                    debug!("Creating session for first turn");
                    self.state = ChannelState::Creating;
                    self.turn = Some(stream);
                    Ok(())
                }
                Err(err) => self.reject(err.to_string()).await,
            },
            ChannelState::Creating => {
                self.reject("session is still being created".to_owned())
                    .await
            }
            ChannelState::Bound(session_id) => {
                match self.manager.submit_turn(&session_id, text).await {
                    Ok(stream) => {
                        if let Some(previous) = self.turn.take() {
                            for update in previous.collect().await {
                                self.forward(update).await?;
                            }
                        }
                        self.turn = Some(stream);
                        Ok(())
                    }
                    Err(err) => self.reject(err.to_string()).await,
                }
            }
            ChannelState::Closed => Ok(()),
        }
    }

    async fn resume(&mut self, session_id: SessionId) -> TransportResult<()> {
        match &self.state {
            ChannelState::Unbound => {}
            ChannelState::Creating => {
                return self
                    .reject("session is still being created".to_owned())
                    .await;
            }
            ChannelState::Bound(current) => {
                let message = format!("channel is already bound to session {current}");
                return self.reject(message).await;
            }
            ChannelState::Closed => return Ok(()),
        }

        match self.manager.resume(&session_id).await {
            Ok(resumed) => {
                info!(session_id = %session_id, messages = resumed.history.len(), "Replaying history");
                self.transport
                    .send(OutboundFrame::History {
                        messages: resumed.history,
                    })
                    .await?;
                self.state = ChannelState::Bound(session_id);
                Ok(())
            }
            Err(err) => self.reject(err.to_string()).await,
        }
    }

    async fn forward(&mut self, update: TurnUpdate) -> TransportResult<()> {
        if let TurnUpdate::SessionBound(session_id) = &update {
            self.state = ChannelState::Bound(session_id.clone());
        }
        self.transport.send(update.into()).await
    }

    async fn reject(&mut self, message: String) -> TransportResult<()> {
        debug!(reason = %message, "Rejecting client request");
        self.transport
            .send(OutboundFrame::TurnError { message })
            .await
    }

    fn detach(mut self) -> ChannelExit {
        let session_id = match std::mem::replace(&mut self.state, ChannelState::Closed) {
            ChannelState::Bound(session_id) => Some(session_id),
            ChannelState::Unbound | ChannelState::Creating | ChannelState::Closed => None,
        };
        let turn_in_flight = self.turn.is_some();
        info!(
            session_id = session_id.as_ref().map(SessionId::as_str),
            turn_in_flight,
            "Client detached"
        );
        ChannelExit {
            session_id,
            turn_in_flight,
        }
    }
}
