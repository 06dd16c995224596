//! One turn's background task and the update stream its caller reads.
//!
//! A turn runs in its own task so a dropped client never cancels it: the
//! task keeps folding upstream events and commits the result whether or
//! not anyone is still listening.

use std::fmt;
use std::sync::Arc;

use mockable::Clock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::accumulator::{OutboundUpdate, StreamAccumulator, TurnHandle};
use super::manager::LiveSession;
use crate::session::{
    domain::{Message, SessionId, StreamEvent},
    error::ManagerError,
    ports::{
        store::{SessionStore, StoreError, StoreResult},
        transport::OutboundFrame,
        upstream::UpstreamEvent,
    },
};

const ABORTED: &str = "turn aborted";
const STREAM_ENDED: &str = "upstream ended the stream before a terminal event";

/// Progress of one turn as seen by the attached caller.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnUpdate {
    /// The upstream assigned an identity to a new session. Sent once,
    /// before any other update of that session.
    SessionBound(SessionId),
    /// An incremental stream update.
    Stream(OutboundUpdate),
    /// The turn completed and its message is stored.
    Completed(Box<Message>),
    /// The turn ended without a stored, completed message.
    Failed(TurnFailure),
}

impl TurnUpdate {
    /// Returns `true` for the final update of a turn.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed(_) | Self::Failed(_))
    }
}

impl From<TurnUpdate> for OutboundFrame {
    fn from(update: TurnUpdate) -> Self {
        match update {
            TurnUpdate::SessionBound(session_id) => Self::SessionBound { session_id },
            TurnUpdate::Stream(stream) => stream.into(),
            TurnUpdate::Completed(_) => Self::TurnComplete,
            TurnUpdate::Failed(failure) => Self::TurnError {
                message: failure.to_string(),
            },
        }
    }
}

/// Why a turn did not produce a completed, stored message.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnFailure {
    /// The upstream reported an error, the stream was lost or the turn was
    /// aborted. `stored` holds the partial message when it was persisted.
    Upstream {
        /// Failure description.
        reason: String,
        /// The stored partial message.
        stored: Option<Box<Message>>,
    },
    /// The assembled message could not be stored; it is staged for
    /// `retry_finalize`.
    Persistence {
        /// Store failure description.
        reason: String,
    },
    /// A new session could not be set up; nothing was stored.
    Setup(String),
}

impl fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream { reason, .. } | Self::Setup(reason) => f.write_str(reason),
            Self::Persistence { reason } => {
                write!(f, "turn was not stored ({reason}); retry finalize")
            }
        }
    }
}

impl From<ManagerError> for TurnFailure {
    fn from(err: ManagerError) -> Self {
        Self::Setup(err.to_string())
    }
}

/// Receiving end of a turn's updates.
///
/// The stream ends after the terminal update. Dropping it detaches the
/// caller; the turn keeps running.
#[derive(Debug)]
pub struct TurnStream {
    rx: mpsc::Receiver<TurnUpdate>,
}

impl TurnStream {
    pub(super) fn channel(buffer: usize) -> (UpdateSink, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (UpdateSink::new(tx), Self { rx })
    }

    /// Awaits the next update; `None` once the turn task has finished.
    pub async fn next(&mut self) -> Option<TurnUpdate> {
        self.rx.recv().await
    }

    /// Drains every remaining update of the turn.
    pub async fn collect(mut self) -> Vec<TurnUpdate> {
        let mut updates = Vec::new();
        while let Some(update) = self.rx.recv().await {
            updates.push(update);
        }
        updates
    }
}

/// Sending end of a turn's updates; tolerates a detached caller.
#[derive(Debug)]
pub(super) struct UpdateSink {
    tx: mpsc::Sender<TurnUpdate>,
    abort: Option<CancellationToken>,
    detached: bool,
}

impl UpdateSink {
    const fn new(tx: mpsc::Sender<TurnUpdate>) -> Self {
        Self {
            tx,
            abort: None,
            detached: false,
        }
    }

    /// Stops waiting on a full buffer once `abort` fires, so an aborted
    /// turn always reaches its commit.
    pub(super) fn abort_on(&mut self, abort: CancellationToken) {
        self.abort = Some(abort);
    }

    pub(super) async fn emit(&mut self, update: TurnUpdate) {
        if self.detached {
            return;
        }
        let delivered = match &self.abort {
            Some(abort) => tokio::select! {
                biased;
                sent = self.tx.send(update) => sent.is_ok(),
                () = abort.cancelled() => {
                    debug!("Turn aborted while the caller was not reading; detaching");
                    false
                }
            },
            None => self.tx.send(update).await.is_ok(),
        };
        if !delivered {
            self.detached = true;
            debug!("Caller detached; turn continues");
        }
    }
}

/// A finalized message that still has store steps outstanding.
#[derive(Debug, Clone)]
pub(super) struct PendingCommit {
    message: Message,
    inserted: bool,
    failure: Option<String>,
}

impl PendingCommit {
    pub(super) const fn new(message: Message, failure: Option<String>) -> Self {
        Self {
            message,
            inserted: false,
            failure,
        }
    }

    pub(super) const fn message(&self) -> &Message {
        &self.message
    }

    /// Runs the outstanding store steps: insert, then usage increment.
    ///
    /// A duplicate-message error for this very message means an earlier
    /// attempt inserted it, so the insert counts as done.
    pub(super) async fn apply<S>(&mut self, store: &S, live: &LiveSession) -> StoreResult<()>
    where
        S: SessionStore + ?Sized,
    {
        if !self.inserted {
            match store.create_message(&self.message).await {
                Ok(()) => {}
                Err(StoreError::DuplicateMessage(id)) if id == self.message.id() => {}
                Err(err) => return Err(err),
            }
            self.inserted = true;
            live.advance_sequence(self.message.sequence_number().next());
        }
        if let Some(usage) = self.message.usage().filter(|usage| !usage.is_zero()) {
            store
                .increment_usage(self.message.session_id(), usage)
                .await?;
        }
        Ok(())
    }

    pub(super) fn into_update(self) -> TurnUpdate {
        match self.failure {
            None => TurnUpdate::Completed(Box::new(self.message)),
            Some(reason) => TurnUpdate::Failed(TurnFailure::Upstream {
                reason,
                stored: Some(Box::new(self.message)),
            }),
        }
    }
}

/// Collaborators a turn task owns.
pub(super) struct TurnContext<S, K: Clock> {
    pub(super) store: Arc<S>,
    pub(super) accumulator: Arc<StreamAccumulator<K>>,
    pub(super) clock: Arc<K>,
    pub(super) live: Arc<LiveSession>,
    pub(super) sink: UpdateSink,
}

/// Streams one turn to completion and commits the result.
///
/// `prompt` is sent first when present; `prelude` holds events already
/// read from the connection before the task started.
pub(super) async fn run_turn<S, K>(
    ctx: TurnContext<S, K>,
    mut handle: TurnHandle,
    prompt: Option<String>,
    prelude: Vec<StreamEvent>,
) where
    S: SessionStore,
    K: Clock + Send + Sync,
{
    let TurnContext {
        store,
        accumulator,
        clock,
        live,
        mut sink,
    } = ctx;

    {
        let mut connection = live.connection().lock().await;
        if let Some(text) = prompt {
            if let Err(err) = connection.send(&text).await {
                warn!(session_id = %live.session_id(), error = %err, "Failed to forward turn upstream");
                accumulator.apply(&mut handle, StreamEvent::error(err.to_string()));
            }
        }

        for event in prelude {
            if let Some(update) = accumulator.apply(&mut handle, event) {
                sink.emit(TurnUpdate::Stream(update)).await;
            }
        }

        while !handle.is_terminal() {
            let event = tokio::select! {
                biased;
                () = live.abort_token().cancelled() => StreamEvent::error(ABORTED),
                next = connection.next_event() => match next {
                    Ok(Some(UpstreamEvent::Stream(event))) => event,
                    Ok(Some(UpstreamEvent::SessionAssigned(id))) => {
                        if &id != live.session_id() {
                            warn!(session_id = %live.session_id(), assigned = %id, "Upstream reassigned identity mid-session; ignoring");
                        }
                        continue;
                    }
                    Ok(None) => StreamEvent::error(STREAM_ENDED),
                    Err(err) => StreamEvent::error(err.to_string()),
                },
            };
            if let Some(update) = accumulator.apply(&mut handle, event) {
                sink.emit(TurnUpdate::Stream(update)).await;
            }
        }
    }

    let turn_id = handle.turn_id();
    let pending = match accumulator.finalize(handle) {
        Ok(message) => PendingCommit::new(message, None),
        Err(failed) => {
            warn!(session_id = %live.session_id(), turn_id = %turn_id, reason = %failed.reason, "Turn failed; storing partial message");
            let reason = failed.reason.clone();
            PendingCommit::new(failed.into_partial(), Some(reason))
        }
    };

    let update = finish_commit(store.as_ref(), &live, pending)
        .await
        .unwrap_or_else(|err| {
            TurnUpdate::Failed(TurnFailure::Persistence {
                reason: err.to_string(),
            })
        });
    live.end_turn(clock.utc());
    sink.emit(update).await;
}

/// Attempts the commit, staging the message on failure.
pub(super) async fn finish_commit<S>(
    store: &S,
    live: &LiveSession,
    mut pending: PendingCommit,
) -> StoreResult<TurnUpdate>
where
    S: SessionStore + ?Sized,
{
    let sequence = pending.message().sequence_number();
    match pending.apply(store, live).await {
        Ok(()) => {
            info!(session_id = %live.session_id(), sequence = %sequence, "Turn committed");
            Ok(pending.into_update())
        }
        Err(err) => {
            warn!(session_id = %live.session_id(), sequence = %sequence, error = %err, "Turn commit failed; staged for retry");
            live.stage(pending);
            Err(err)
        }
    }
}
