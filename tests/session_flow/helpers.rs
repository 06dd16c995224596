//! Shared test helpers for session flow integration tests.

use std::io;
use std::sync::Arc;

use mockable::DefaultClock;
use palaver::session::{
    adapters::memory::{InMemorySessionStore, ScriptedUpstream, TurnScript},
    domain::{Message, SessionId, StreamEvent},
    ports::store::SessionStore,
    services::{ManagerConfig, SessionManager, StreamAccumulator, ToolConventions, TurnUpdate},
};
use rstest::fixture;
use tokio::runtime::Runtime;

/// Manager type wired to in-memory collaborators.
pub type TestManager = SessionManager<InMemorySessionStore, ScriptedUpstream, DefaultClock>;

/// Boxed error used by test bodies.
pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Provides a tokio runtime for async operations in tests.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
#[fixture]
pub fn runtime() -> io::Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

/// One engine instance: store, scripted upstream and manager.
pub struct Engine {
    /// Shared store; survives a simulated restart.
    pub store: Arc<InMemorySessionStore>,
    /// Scripted upstream agent.
    pub upstream: ScriptedUpstream,
    /// The manager under test.
    pub manager: TestManager,
}

impl Engine {
    /// Builds an engine over the given store.
    #[must_use]
    pub fn over(store: Arc<InMemorySessionStore>) -> Self {
        let clock = Arc::new(DefaultClock);
        let upstream = ScriptedUpstream::new();
        let manager = SessionManager::new(
            Arc::clone(&store),
            Arc::new(upstream.clone()),
            Arc::new(StreamAccumulator::new(
                ToolConventions::default(),
                Arc::clone(&clock),
            )),
            clock,
            ManagerConfig::default(),
        );
        Self {
            store,
            upstream,
            manager,
        }
    }

    /// Opens a session and drains its first turn.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be opened or never binds.
    pub async fn open(&self, text: &str) -> TestResult<(SessionId, Vec<TurnUpdate>)> {
        let updates = self.manager.open_session(text).await?.collect().await;
        let id = updates
            .iter()
            .find_map(|update| match update {
                TurnUpdate::SessionBound(id) => Some(id.clone()),
                _ => None,
            })
            .ok_or("session was never bound")?;
        Ok((id, updates))
    }

    /// Submits a turn and drains it.
    ///
    /// # Errors
    ///
    /// Returns an error if the turn is rejected.
    pub async fn turn(&self, id: &SessionId, text: &str) -> TestResult<Vec<TurnUpdate>> {
        Ok(self.manager.submit_turn(id, text).await?.collect().await)
    }

    /// Returns the stored history of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn history(&self, id: &SessionId) -> TestResult<Vec<Message>> {
        Ok(self.store.list_messages(id).await?)
    }
}

/// Provides a fresh engine over an empty store.
#[fixture]
pub fn engine() -> Engine {
    Engine::over(Arc::new(InMemorySessionStore::new()))
}

/// Builds a turn script from events.
#[must_use]
pub fn script(events: impl IntoIterator<Item = StreamEvent>) -> TurnScript {
    TurnScript::from_events(events)
}

/// Returns the sequence numbers of `messages` in order.
#[must_use]
pub fn sequences(messages: &[Message]) -> Vec<u64> {
    messages
        .iter()
        .map(|message| message.sequence_number().value())
        .collect()
}
