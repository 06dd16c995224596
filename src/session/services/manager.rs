//! Session connection manager: at most one live upstream connection per
//! session identity.
//!
//! Each binding owns the upstream connection, the next sequence number and
//! the in-flight flag of its session. Turns run as spawned tasks and report
//! through a [`TurnStream`]. Dropping the stream detaches; `close` aborts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mockable::Clock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::accumulator::StreamAccumulator;
use super::turn::{
    PendingCommit, TurnContext, TurnFailure, TurnStream, TurnUpdate, UpdateSink, finish_commit,
    run_turn,
};
use crate::session::{
    domain::{Message, SequenceNumber, SessionId, SessionRecord, StreamEvent},
    error::{ManagerError, ManagerResult},
    ports::{
        store::SessionStore,
        upstream::{AgentConnection, AgentUpstream, UpstreamError, UpstreamEvent},
    },
};

/// Runtime limits of a [`SessionManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Maximum number of live bindings.
    pub max_live_sessions: usize,
    /// Bindings idle this long with no turn in flight are reaped.
    pub idle_timeout: Duration,
    /// How long a replaced binding's in-flight turn may run before it is
    /// aborted.
    pub replace_grace: Duration,
    /// Per-turn update buffer.
    pub update_buffer: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_live_sessions: 100,
            idle_timeout: Duration::from_secs(30 * 60),
            replace_grace: Duration::from_secs(5),
            update_buffer: 64,
        }
    }
}

/// A session bound by `resume`, with the history to replay.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumedSession {
    /// The stored session record.
    pub record: SessionRecord,
    /// Every stored message in sequence order.
    pub history: Vec<Message>,
}

/// The live state of one bound session.
pub(super) struct LiveSession {
    session_id: SessionId,
    connection: Mutex<Box<dyn AgentConnection>>,
    next_sequence: AtomicU64,
    in_flight: AtomicBool,
    pending: StdMutex<Option<PendingCommit>>,
    turn_task: StdMutex<Option<JoinHandle<()>>>,
    abort: CancellationToken,
    last_activity: StdMutex<DateTime<Utc>>,
}

impl LiveSession {
    fn new(
        session_id: SessionId,
        connection: Box<dyn AgentConnection>,
        next_sequence: SequenceNumber,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            connection: Mutex::new(connection),
            next_sequence: AtomicU64::new(next_sequence.value()),
            in_flight: AtomicBool::new(false),
            pending: StdMutex::new(None),
            turn_task: StdMutex::new(None),
            abort: CancellationToken::new(),
            last_activity: StdMutex::new(now),
        }
    }

    pub(super) const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub(super) const fn connection(&self) -> &Mutex<Box<dyn AgentConnection>> {
        &self.connection
    }

    pub(super) const fn abort_token(&self) -> &CancellationToken {
        &self.abort
    }

    fn next_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.next_sequence.load(Ordering::SeqCst))
    }

    pub(super) fn advance_sequence(&self, next: SequenceNumber) {
        self.next_sequence.fetch_max(next.value(), Ordering::SeqCst);
    }

    fn try_begin_turn(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub(super) fn end_turn(&self, now: DateTime<Utc>) {
        self.touch(now);
        self.in_flight.store(false, Ordering::SeqCst);
    }

    fn touch(&self, now: DateTime<Utc>) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = now;
    }

    fn idle_since(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn stage(&self, pending: PendingCommit) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(pending);
    }

    fn take_pending(&self) -> Option<PendingCommit> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn has_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn set_task(&self, task: JoinHandle<()>) {
        *self.turn_task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.turn_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

type LiveMap = HashMap<SessionId, Arc<LiveSession>>;

struct ManagerInner<S, U, K: Clock> {
    store: Arc<S>,
    upstream: Arc<U>,
    accumulator: Arc<StreamAccumulator<K>>,
    clock: Arc<K>,
    config: ManagerConfig,
    live: Mutex<LiveMap>,
    unsettled: StdMutex<HashMap<SessionId, PendingCommit>>,
    shutting_down: AtomicBool,
}

/// Owns the mapping from session identity to its live upstream connection.
///
/// # Example
///
/// ```ignore
/// use palaver::session::services::{SessionManager, ManagerConfig};
///
/// let manager = SessionManager::new(store, upstream, accumulator, clock, ManagerConfig::default());
/// let mut stream = manager.open_session("hello").await?;
/// while let Some(update) = stream.next().await {
///     // forward to the client
/// }
/// ```
pub struct SessionManager<S, U, K>
where
    S: SessionStore + 'static,
    U: AgentUpstream + 'static,
    K: Clock + Send + Sync + 'static,
{
    inner: Arc<ManagerInner<S, U, K>>,
}

impl<S, U, K> Clone for SessionManager<S, U, K>
where
    S: SessionStore + 'static,
    U: AgentUpstream + 'static,
    K: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, U, K> SessionManager<S, U, K>
where
    S: SessionStore + 'static,
    U: AgentUpstream + 'static,
    K: Clock + Send + Sync + 'static,
{
    /// Creates a manager with no live bindings.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        upstream: Arc<U>,
        accumulator: Arc<StreamAccumulator<K>>,
        clock: Arc<K>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                store,
                upstream,
                accumulator,
                clock,
                config,
                live: Mutex::new(HashMap::new()),
                unsettled: StdMutex::new(HashMap::new()),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Starts a brand-new conversation with its first turn.
    ///
    /// The upstream assigns the identity in its first response. The
    /// returned stream yields [`TurnUpdate::SessionBound`] exactly once as
    /// soon as that happens, then the turn's updates.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::EmptyTurn`], [`ManagerError::ShuttingDown`],
    /// [`ManagerError::CapacityExhausted`] or [`ManagerError::Upstream`]
    /// if the connection cannot be opened or the turn not forwarded.
    pub async fn open_session(&self, first_text: &str) -> ManagerResult<TurnStream> {
        validate_text(first_text)?;
        self.ensure_running()?;
        {
            let live = self.inner.live.lock().await;
            self.ensure_capacity(&live, None)?;
        }

        let mut connection = self.inner.upstream.open(None).await?;
        if let Err(err) = connection.send(first_text).await {
            close_quietly(&mut *connection).await;
            return Err(err.into());
        }

        let (sink, stream) = TurnStream::channel(self.inner.config.update_buffer);
        let manager = self.clone();
        let text = first_text.to_owned();
        tokio::spawn(async move {
            manager.bind_new_session(connection, &text, sink).await;
        });
        Ok(stream)
    }

    async fn bind_new_session(
        &self,
        mut connection: Box<dyn AgentConnection>,
        text: &str,
        mut sink: UpdateSink,
    ) {
        let (session_id, prelude) = match await_assignment(&mut *connection).await {
            Ok(assigned) => assigned,
            Err(err) => {
                warn!(error = %err, "New session failed before the upstream assigned an identity");
                close_quietly(&mut *connection).await;
                sink.emit(TurnUpdate::Failed(ManagerError::from(err).into()))
                    .await;
                return;
            }
        };

        let now = self.inner.clock.utc();
        let record = match self
            .inner
            .store
            .get_or_create_session(&session_id, now)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Failed to persist new session");
                close_quietly(&mut *connection).await;
                sink.emit(TurnUpdate::Failed(ManagerError::from(err).into()))
                    .await;
                return;
            }
        };

        let live = Arc::new(LiveSession::new(
            session_id.clone(),
            connection,
            record.next_sequence(),
            now,
        ));
        live.in_flight.store(true, Ordering::SeqCst);

        if let Err(err) = self.register(Arc::clone(&live)).await {
            warn!(session_id = %session_id, error = %err, "Cannot bind new session");
            self.release_logged(&live, Duration::ZERO).await;
            sink.emit(TurnUpdate::Failed(err.into())).await;
            return;
        }

        info!(session_id = %session_id, "Session bound");
        sink.abort_on(live.abort_token().clone());
        sink.emit(TurnUpdate::SessionBound(session_id.clone())).await;

        if let Err(update) = self.store_user_message(&live, text).await {
            live.end_turn(self.inner.clock.utc());
            sink.emit(update).await;
            return;
        }
        self.spawn_turn(&live, sink, None, prelude);
    }

    /// Binds an existing session and returns its history for replay.
    ///
    /// An existing binding for the same identity is replaced: its
    /// in-flight turn gets the configured grace period, then is aborted.
    /// A commit left unstored by an earlier release is staged on the new
    /// binding, ready for [`Self::retry_finalize`].
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] for unknown identities,
    /// [`ManagerError::Upstream`] if the connection cannot be opened and
    /// [`ManagerError::Persistence`] if history cannot be read.
    pub async fn resume(&self, session_id: &SessionId) -> ManagerResult<ResumedSession> {
        self.ensure_running()?;

        let replaced = self.inner.live.lock().await.remove(session_id);
        if let Some(previous) = replaced {
            info!(session_id = %session_id, "Replacing existing binding");
            self.release_logged(&previous, self.inner.config.replace_grace)
                .await;
        }

        {
            let live = self.inner.live.lock().await;
            self.ensure_capacity(&live, Some(session_id))?;
        }

        let record = self
            .inner
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.clone()))?;

        let mut connection = self
            .inner
            .upstream
            .open(Some(session_id.continuation_token()))
            .await?;

        let history = match self.inner.store.list_messages(session_id).await {
            Ok(history) => history,
            Err(err) => {
                close_quietly(&mut *connection).await;
                return Err(err.into());
            }
        };

        let next_sequence = history
            .last()
            .map_or(SequenceNumber::FIRST, |message| {
                message.sequence_number().next()
            })
            .max(record.next_sequence());
        let live = Arc::new(LiveSession::new(
            session_id.clone(),
            connection,
            next_sequence,
            self.inner.clock.utc(),
        ));
        if let Some(pending) = self.unpark(session_id) {
            debug!(session_id = %session_id, "Restaging unstored commit");
            live.stage(pending);
        }
        if let Err(err) = self.register(Arc::clone(&live)).await {
            self.release_logged(&live, Duration::ZERO).await;
            return Err(err);
        }

        info!(session_id = %session_id, messages = history.len(), "Session resumed");
        Ok(ResumedSession { record, history })
    }

    /// Forwards a turn over the session's live connection.
    ///
    /// The user message is stored before this returns. A turn submitted
    /// while another is streaming is rejected, never queued.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::EmptyTurn`], [`ManagerError::NotBound`],
    /// [`ManagerError::CommitPending`],
    /// [`ManagerError::ConcurrencyViolation`] or
    /// [`ManagerError::Persistence`] if the user message cannot be stored.
    pub async fn submit_turn(&self, session_id: &SessionId, text: &str) -> ManagerResult<TurnStream> {
        validate_text(text)?;
        self.ensure_running()?;
        let live = self.bound(session_id).await?;

        if !live.try_begin_turn() {
            debug!(session_id = %session_id, "Rejecting turn: another turn is in flight");
            return Err(ManagerError::ConcurrencyViolation {
                session_id: session_id.clone(),
            });
        }
        if live.has_pending() {
            live.in_flight.store(false, Ordering::SeqCst);
            return Err(ManagerError::CommitPending(session_id.clone()));
        }

        if let Err(err) = self.persist_user_message(&live, text).await {
            live.end_turn(self.inner.clock.utc());
            return Err(err);
        }

        let (sink, stream) = TurnStream::channel(self.inner.config.update_buffer);
        self.spawn_turn(&live, sink, Some(text.to_owned()), Vec::new());
        Ok(stream)
    }

    /// Releases the session's upstream connection. Stored history is kept.
    ///
    /// A turn still in flight is aborted; its partial message is stored.
    /// A staged commit gets one more attempt before the binding goes.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotBound`] if the session is not bound, or
    /// [`ManagerError::CommitPending`] if the turn's message still cannot
    /// be stored. The connection is released either way; the message is
    /// kept and restaged by the next [`Self::resume`].
    pub async fn close(&self, session_id: &SessionId) -> ManagerResult<()> {
        let live = self
            .inner
            .live
            .lock()
            .await
            .remove(session_id)
            .ok_or_else(|| ManagerError::NotBound(session_id.clone()))?;
        self.release(&live, Duration::ZERO).await?;
        info!(session_id = %session_id, "Session closed");
        Ok(())
    }

    /// Retries the store steps of a turn whose commit failed.
    ///
    /// Only the commit is retried; the turn is not re-run upstream.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::NotBound`],
    /// [`ManagerError::NothingPending`],
    /// [`ManagerError::ConcurrencyViolation`] or
    /// [`ManagerError::Persistence`] if the store fails again; the message
    /// stays staged in that case.
    pub async fn retry_finalize(&self, session_id: &SessionId) -> ManagerResult<TurnUpdate> {
        let live = self.bound(session_id).await?;
        if !live.try_begin_turn() {
            return Err(ManagerError::ConcurrencyViolation {
                session_id: session_id.clone(),
            });
        }
        let Some(pending) = live.take_pending() else {
            live.in_flight.store(false, Ordering::SeqCst);
            return Err(ManagerError::NothingPending(session_id.clone()));
        };

        let result = finish_commit(self.inner.store.as_ref(), &live, pending).await;
        live.end_turn(self.inner.clock.utc());
        result.map_err(ManagerError::from)
    }

    /// Closes any binding and deletes the session with its messages.
    ///
    /// An unstored commit of the session is discarded with it.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] if nothing was stored
    /// under this identity, or [`ManagerError::Persistence`].
    pub async fn delete_session(&self, session_id: &SessionId) -> ManagerResult<()> {
        match self.close(session_id).await {
            Ok(()) | Err(ManagerError::NotBound(_) | ManagerError::CommitPending(_)) => {}
            Err(err) => return Err(err),
        }
        if self.unpark(session_id).is_some() {
            debug!(session_id = %session_id, "Discarding unstored commit of deleted session");
        }
        if self.inner.store.delete_session(session_id).await? {
            info!(session_id = %session_id, "Session deleted");
            Ok(())
        } else {
            Err(ManagerError::SessionNotFound(session_id.clone()))
        }
    }

    /// Releases bindings idle for longer than the configured timeout.
    ///
    /// Bindings with a turn in flight or a staged commit are kept.
    /// Returns the released identities.
    pub async fn reap_idle(&self) -> Vec<SessionId> {
        let now = self.inner.clock.utc();
        let timeout = chrono::Duration::from_std(self.inner.config.idle_timeout)
            .unwrap_or(chrono::TimeDelta::MAX);

        let reaped: Vec<Arc<LiveSession>> = {
            let mut live = self.inner.live.lock().await;
            let idle: Vec<SessionId> = live
                .values()
                .filter(|session| {
                    !session.is_in_flight()
                        && !session.has_pending()
                        && now.signed_duration_since(session.idle_since()) >= timeout
                })
                .map(|session| session.session_id().clone())
                .collect();
            idle.iter().filter_map(|id| live.remove(id)).collect()
        };

        let mut ids = Vec::with_capacity(reaped.len());
        for session in reaped {
            debug!(session_id = %session.session_id(), "Reaping idle session");
            ids.push(session.session_id().clone());
            self.release_logged(&session, Duration::ZERO).await;
        }
        ids.sort();
        ids
    }

    /// Stops accepting work and releases every binding, giving in-flight
    /// turns the replacement grace period.
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let drained: Vec<Arc<LiveSession>> = {
            let mut live = self.inner.live.lock().await;
            live.drain().map(|(_, session)| session).collect()
        };
        info!(sessions = drained.len(), "Session manager shutting down");
        for session in drained {
            self.release_logged(&session, self.inner.config.replace_grace)
                .await;
        }
        let unstored = self
            .inner
            .unsettled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        if unstored > 0 {
            warn!(sessions = unstored, "Shutting down with unstored commits");
        }
    }

    /// Returns the identities of all live bindings, sorted.
    pub async fn live_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.inner.live.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Returns `true` if the session has a live binding.
    pub async fn is_bound(&self, session_id: &SessionId) -> bool {
        self.inner.live.lock().await.contains_key(session_id)
    }

    /// Returns `true` if the session has a turn in flight.
    pub async fn is_turn_in_flight(&self, session_id: &SessionId) -> bool {
        self.inner
            .live
            .lock()
            .await
            .get(session_id)
            .is_some_and(|session| session.is_in_flight())
    }

    /// Returns `true` if the session has a commit staged for retry, on its
    /// live binding or kept from a released one.
    pub async fn has_pending_commit(&self, session_id: &SessionId) -> bool {
        let staged = self
            .inner
            .live
            .lock()
            .await
            .get(session_id)
            .is_some_and(|session| session.has_pending());
        staged
            || self
                .inner
                .unsettled
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains_key(session_id)
    }

    fn ensure_running(&self) -> ManagerResult<()> {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            return Err(ManagerError::ShuttingDown);
        }
        Ok(())
    }

    fn ensure_capacity(&self, live: &LiveMap, rebinding: Option<&SessionId>) -> ManagerResult<()> {
        let limit = self.inner.config.max_live_sessions;
        let already_counted = rebinding.is_some_and(|id| live.contains_key(id));
        if !already_counted && live.len() >= limit {
            return Err(ManagerError::CapacityExhausted { limit });
        }
        Ok(())
    }

    async fn bound(&self, session_id: &SessionId) -> ManagerResult<Arc<LiveSession>> {
        self.inner
            .live
            .lock()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| ManagerError::NotBound(session_id.clone()))
    }

    /// Inserts a binding, replacing any binding that raced in meanwhile.
    async fn register(&self, session: Arc<LiveSession>) -> ManagerResult<()> {
        let displaced = {
            let mut live = self.inner.live.lock().await;
            if self.inner.shutting_down.load(Ordering::SeqCst) {
                return Err(ManagerError::ShuttingDown);
            }
            self.ensure_capacity(&live, Some(session.session_id()))?;
            live.insert(session.session_id().clone(), session)
        };
        if let Some(previous) = displaced {
            warn!(session_id = %previous.session_id(), "Displacing concurrent binding");
            self.release_logged(&previous, self.inner.config.replace_grace)
                .await;
        }
        Ok(())
    }

    /// Lets an in-flight turn finish within `grace`, aborts it otherwise,
    /// then closes the upstream connection and settles any staged commit.
    async fn release(&self, session: &LiveSession, grace: Duration) -> ManagerResult<()> {
        if let Some(mut task) = session.take_task() {
            let finished = !grace.is_zero()
                && tokio::time::timeout(grace, &mut task).await.is_ok();
            if !finished {
                session.abort_token().cancel();
                if let Err(err) = task.await {
                    warn!(session_id = %session.session_id(), error = %err, "Turn task ended abnormally");
                }
            }
        }
        session.abort_token().cancel();
        {
            let mut connection = session.connection().lock().await;
            close_quietly(&mut **connection).await;
        }
        self.settle(session).await
    }

    async fn release_logged(&self, session: &LiveSession, grace: Duration) {
        if let Err(err) = self.release(session, grace).await {
            debug!(session_id = %session.session_id(), error = %err, "Released with an unstored commit");
        }
    }

    /// Gives a staged commit one more store attempt. On failure the commit
    /// outlives the binding until the session is resumed or deleted.
    async fn settle(&self, session: &LiveSession) -> ManagerResult<()> {
        let Some(pending) = session.take_pending() else {
            return Ok(());
        };
        let session_id = session.session_id();
        match finish_commit(self.inner.store.as_ref(), session, pending).await {
            Ok(_) => {
                info!(session_id = %session_id, "Stored staged commit on release");
                Ok(())
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "Staged commit still unstored; keeping it");
                if let Some(kept) = session.take_pending() {
                    self.inner
                        .unsettled
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(session_id.clone(), kept);
                }
                Err(ManagerError::CommitPending(session_id.clone()))
            }
        }
    }

    fn unpark(&self, session_id: &SessionId) -> Option<PendingCommit> {
        self.inner
            .unsettled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    async fn persist_user_message(&self, live: &LiveSession, text: &str) -> ManagerResult<()> {
        let sequence = live.next_sequence();
        let message = Message::user(
            live.session_id().clone(),
            sequence,
            text,
            self.inner.clock.as_ref(),
        );
        self.inner.store.create_message(&message).await?;
        live.advance_sequence(sequence.next());
        debug!(session_id = %live.session_id(), sequence = %sequence, "User message stored");
        Ok(())
    }

    async fn store_user_message(&self, live: &LiveSession, text: &str) -> Result<(), TurnUpdate> {
        self.persist_user_message(live, text).await.map_err(|err| {
            warn!(session_id = %live.session_id(), error = %err, "Failed to store user message");
            TurnUpdate::Failed(TurnFailure::Persistence {
                reason: err.to_string(),
            })
        })
    }

    fn spawn_turn(
        &self,
        live: &Arc<LiveSession>,
        mut sink: UpdateSink,
        prompt: Option<String>,
        prelude: Vec<StreamEvent>,
    ) {
        let handle = self
            .inner
            .accumulator
            .begin_turn(live.session_id().clone(), live.next_sequence());
        sink.abort_on(live.abort_token().clone());
        let ctx = TurnContext {
            store: Arc::clone(&self.inner.store),
            accumulator: Arc::clone(&self.inner.accumulator),
            clock: Arc::clone(&self.inner.clock),
            live: Arc::clone(live),
            sink,
        };
        live.set_task(tokio::spawn(run_turn(ctx, handle, prompt, prelude)));
    }
}

fn validate_text(text: &str) -> ManagerResult<()> {
    if text.trim().is_empty() {
        return Err(ManagerError::EmptyTurn);
    }
    Ok(())
}

/// Reads events until the upstream assigns an identity, keeping the stream
/// events that arrived first.
async fn await_assignment(
    connection: &mut dyn AgentConnection,
) -> Result<(SessionId, Vec<StreamEvent>), UpstreamError> {
    let mut prelude = Vec::new();
    loop {
        match connection.next_event().await? {
            Some(UpstreamEvent::SessionAssigned(id)) => return Ok((id, prelude)),
            Some(UpstreamEvent::Stream(event)) => {
                if let StreamEvent::TurnError { message } = &event {
                    return Err(UpstreamError::Connection(message.clone()));
                }
                if event.is_terminal() {
                    return Err(UpstreamError::Connection(
                        "turn ended before the upstream assigned a session identity".to_owned(),
                    ));
                }
                prelude.push(event);
            }
            None => {
                return Err(UpstreamError::Connection(
                    "stream ended before the upstream assigned a session identity".to_owned(),
                ));
            }
        }
    }
}

async fn close_quietly(connection: &mut dyn AgentConnection) {
    if let Err(err) = connection.close().await {
        warn!(error = %err, "Failed to close upstream connection");
    }
}
