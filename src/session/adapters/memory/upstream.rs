//! Deterministic upstream agent that plays pre-recorded turn scripts.
//!
//! Each `send` consumes the next queued [`TurnScript`]; connections opened
//! without a continuation token announce a freshly assigned session
//! identity ahead of the first turn's events.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::session::{
    domain::{ContinuationToken, SessionId, StreamEvent},
    ports::upstream::{
        AgentConnection, AgentUpstream, UpstreamError, UpstreamEvent, UpstreamResult,
    },
};

/// One step of a scripted turn.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Yield an event.
    Event(UpstreamEvent),
    /// Sleep before the next step.
    Pause(Duration),
    /// Wait until the gate is notified.
    Gate(Arc<Notify>),
    /// Fail the connection with the given reason.
    Fail(String),
    /// End the stream without a terminal event.
    End,
}

/// The ordered steps the upstream plays for one turn.
///
/// # Examples
///
/// ```
/// use palaver::session::adapters::memory::TurnScript;
/// use palaver::session::domain::StreamEvent;
///
/// let script = TurnScript::new()
///     .event(StreamEvent::prose("Hi"))
///     .event(StreamEvent::complete());
/// assert_eq!(script.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TurnScript {
    steps: Vec<ScriptStep>,
}

impl TurnScript {
    /// Creates an empty script.
    #[must_use]
    pub const fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Builds a script that yields the given events in order.
    #[must_use]
    pub fn from_events(events: impl IntoIterator<Item = StreamEvent>) -> Self {
        events.into_iter().fold(Self::new(), Self::event)
    }

    /// Appends a stream event.
    #[must_use]
    pub fn event(mut self, event: StreamEvent) -> Self {
        self.steps
            .push(ScriptStep::Event(UpstreamEvent::Stream(event)));
        self
    }

    /// Appends an identity assignment.
    #[must_use]
    pub fn assign(mut self, session_id: SessionId) -> Self {
        self.steps
            .push(ScriptStep::Event(UpstreamEvent::SessionAssigned(session_id)));
        self
    }

    /// Appends a pause.
    #[must_use]
    pub fn pause(mut self, duration: Duration) -> Self {
        self.steps.push(ScriptStep::Pause(duration));
        self
    }

    /// Appends a gate the test releases with [`Notify::notify_one`].
    #[must_use]
    pub fn gate(mut self, gate: Arc<Notify>) -> Self {
        self.steps.push(ScriptStep::Gate(gate));
        self
    }

    /// Appends a connection failure.
    #[must_use]
    pub fn fail(mut self, reason: impl Into<String>) -> Self {
        self.steps.push(ScriptStep::Fail(reason.into()));
        self
    }

    /// Appends an end of stream.
    #[must_use]
    pub fn end(mut self) -> Self {
        self.steps.push(ScriptStep::End);
        self
    }

    /// Returns the number of steps.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the script has no steps.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    turns: VecDeque<TurnScript>,
    session_ids: VecDeque<SessionId>,
    assigned: u64,
    opened_with: Vec<Option<ContinuationToken>>,
    prompts: Vec<String>,
    closed: usize,
    fail_open: Option<String>,
    fail_send: Option<String>,
}

/// Scripted implementation of [`AgentUpstream`].
#[derive(Debug, Default, Clone)]
pub struct ScriptedUpstream {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedUpstream {
    /// Creates an upstream with no queued turns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the script for the next submitted turn.
    pub fn push_turn(&self, script: TurnScript) {
        if let Ok(mut state) = self.state.lock() {
            state.turns.push_back(script);
        }
    }

    /// Queues the identity the next new connection is assigned.
    ///
    /// Without a queued identity, new connections are assigned
    /// `session-1`, `session-2` and so on.
    pub fn push_session_id(&self, session_id: SessionId) {
        if let Ok(mut state) = self.state.lock() {
            state.session_ids.push_back(session_id);
        }
    }

    /// Makes the next `open` fail.
    pub fn fail_next_open(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_open = Some(reason.into());
        }
    }

    /// Makes the next `send` fail.
    pub fn fail_next_send(&self, reason: impl Into<String>) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_send = Some(reason.into());
        }
    }

    /// Returns every prompt sent so far, in order.
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|state| state.prompts.clone())
            .unwrap_or_default()
    }

    /// Returns the continuation token passed to each `open`, in order.
    #[must_use]
    pub fn opened_with(&self) -> Vec<Option<ContinuationToken>> {
        self.state
            .lock()
            .map(|state| state.opened_with.clone())
            .unwrap_or_default()
    }

    /// Returns the number of connections opened and not yet closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state
            .lock()
            .map(|state| state.opened_with.len().saturating_sub(state.closed))
            .unwrap_or(0)
    }

    fn lock(&self) -> UpstreamResult<MutexGuard<'_, ScriptState>> {
        lock_state(&self.state)
    }
}

fn lock_state(state: &Mutex<ScriptState>) -> UpstreamResult<MutexGuard<'_, ScriptState>> {
    state
        .lock()
        .map_err(|e| UpstreamError::client(std::io::Error::other(e.to_string())))
}

#[async_trait]
impl AgentUpstream for ScriptedUpstream {
    async fn open(
        &self,
        continuation: Option<ContinuationToken>,
    ) -> UpstreamResult<Box<dyn AgentConnection>> {
        let mut state = self.lock()?;
        if let Some(reason) = state.fail_open.take() {
            return Err(UpstreamError::Open(reason));
        }

        let pending_assignment = if continuation.is_none() {
            state.assigned = state.assigned.saturating_add(1);
            let fallback = format!("session-{}", state.assigned);
            let assigned = match state.session_ids.pop_front() {
                Some(id) => id,
                None => SessionId::new(fallback).map_err(UpstreamError::client)?,
            };
            Some(assigned)
        } else {
            None
        };
        state.opened_with.push(continuation);

        Ok(Box::new(ScriptedConnection {
            state: Arc::clone(&self.state),
            pending_assignment,
            steps: VecDeque::new(),
            closed: false,
        }))
    }
}

/// Connection produced by [`ScriptedUpstream`].
#[derive(Debug)]
struct ScriptedConnection {
    state: Arc<Mutex<ScriptState>>,
    pending_assignment: Option<SessionId>,
    steps: VecDeque<ScriptStep>,
    closed: bool,
}

#[async_trait]
impl AgentConnection for ScriptedConnection {
    async fn send(&mut self, text: &str) -> UpstreamResult<()> {
        if self.closed {
            return Err(UpstreamError::Connection("connection closed".to_owned()));
        }
        let mut state = lock_state(&self.state)?;
        if let Some(reason) = state.fail_send.take() {
            return Err(UpstreamError::Connection(reason));
        }
        state.prompts.push(text.to_owned());
        let script = state
            .turns
            .pop_front()
            .unwrap_or_else(|| TurnScript::new().event(StreamEvent::complete()));
        drop(state);

        self.steps = script.steps.into();
        if let Some(id) = self.pending_assignment.take() {
            self.steps
                .push_front(ScriptStep::Event(UpstreamEvent::SessionAssigned(id)));
        }
        Ok(())
    }

    async fn next_event(&mut self) -> UpstreamResult<Option<UpstreamEvent>> {
        while let Some(step) = self.steps.pop_front() {
            match step {
                ScriptStep::Event(event) => return Ok(Some(event)),
                ScriptStep::Pause(duration) => tokio::time::sleep(duration).await,
                ScriptStep::Gate(gate) => gate.notified().await,
                ScriptStep::Fail(reason) => return Err(UpstreamError::Connection(reason)),
                ScriptStep::End => return Ok(None),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> UpstreamResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.steps.clear();
        let mut state = lock_state(&self.state)?;
        state.closed = state.closed.saturating_add(1);
        Ok(())
    }
}
