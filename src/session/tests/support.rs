//! Shared fixtures for session unit tests.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::{Clock, DefaultClock};

use crate::session::{
    adapters::memory::{InMemorySessionStore, ScriptedUpstream, TurnScript},
    domain::{SessionId, StreamEvent},
    services::{ManagerConfig, SessionManager, StreamAccumulator, ToolConventions, TurnUpdate},
};

/// A clock that only moves when told to.
#[derive(Debug)]
pub(super) struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub(super) fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub(super) fn epoch() -> Self {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp");
        Self::starting_at(start)
    }

    pub(super) fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A manager wired to in-memory collaborators.
pub(super) struct Harness<K: Clock + Send + Sync + 'static> {
    pub(super) store: Arc<InMemorySessionStore>,
    pub(super) upstream: ScriptedUpstream,
    pub(super) clock: Arc<K>,
    pub(super) manager: SessionManager<InMemorySessionStore, ScriptedUpstream, K>,
}

impl<K: Clock + Send + Sync + 'static> Harness<K> {
    pub(super) fn with_clock(clock: Arc<K>, config: ManagerConfig) -> Self {
        Self::over_store(Arc::new(InMemorySessionStore::new()), clock, config)
    }

    /// Builds a fresh manager over an existing store, as after a restart.
    pub(super) fn over_store(
        store: Arc<InMemorySessionStore>,
        clock: Arc<K>,
        config: ManagerConfig,
    ) -> Self {
        let upstream = ScriptedUpstream::new();
        let accumulator = Arc::new(StreamAccumulator::new(
            ToolConventions::default(),
            Arc::clone(&clock),
        ));
        let manager = SessionManager::new(
            Arc::clone(&store),
            Arc::new(upstream.clone()),
            accumulator,
            Arc::clone(&clock),
            config,
        );
        Self {
            store,
            upstream,
            clock,
            manager,
        }
    }

    /// Opens a session, drains its first turn and returns the identity.
    pub(super) async fn open_completed(&self, text: &str) -> (SessionId, Vec<TurnUpdate>) {
        let updates = self
            .manager
            .open_session(text)
            .await
            .expect("session opens")
            .collect()
            .await;
        let id = bound_id(&updates).expect("session was bound");
        (id, updates)
    }
}

pub(super) type TestHarness = Harness<DefaultClock>;

pub(super) fn harness(config: ManagerConfig) -> TestHarness {
    Harness::with_clock(Arc::new(DefaultClock), config)
}

pub(super) fn session_id(raw: &str) -> SessionId {
    SessionId::new(raw).expect("valid session id")
}

pub(super) fn script(events: impl IntoIterator<Item = StreamEvent>) -> TurnScript {
    TurnScript::from_events(events)
}

pub(super) fn greeting() -> TurnScript {
    script([
        StreamEvent::prose("Hi"),
        StreamEvent::prose(" there"),
        StreamEvent::complete(),
    ])
}

pub(super) fn bound_id(updates: &[TurnUpdate]) -> Option<SessionId> {
    updates.iter().find_map(|update| match update {
        TurnUpdate::SessionBound(id) => Some(id.clone()),
        _ => None,
    })
}

pub(super) fn terminal(updates: &[TurnUpdate]) -> Option<&TurnUpdate> {
    updates.last().filter(|update| update.is_terminal())
}
