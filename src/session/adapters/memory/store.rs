//! In-memory implementation of the `SessionStore` port.
//!
//! Thread-safe via a single [`RwLock`] over all sessions and messages, so
//! every write is trivially atomic. Suitable for tests and embedded use;
//! nothing survives the process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::session::{
    domain::{Message, MessageId, Page, SessionId, SessionMetadata, SessionRecord, TurnUsage},
    ports::store::{SessionStore, StoreError, StoreResult},
};

#[derive(Debug, Default)]
struct State {
    sessions: HashMap<SessionId, SessionRecord>,
    messages: HashMap<SessionId, Vec<Message>>,
    message_ids: HashSet<MessageId>,
}

/// In-memory implementation of [`SessionStore`].
///
/// # Example
///
/// ```
/// use palaver::session::adapters::memory::InMemorySessionStore;
///
/// let store = InMemorySessionStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemorySessionStore {
    state: Arc<RwLock<State>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored sessions.
    ///
    /// Returns `0` if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state
            .read()
            .map(|guard| guard.sessions.len())
            .unwrap_or(0)
    }

    /// Returns `true` if no sessions are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the total number of stored messages across all sessions.
    #[must_use]
    pub fn message_total(&self) -> usize {
        self.state
            .read()
            .map(|guard| guard.message_ids.len())
            .unwrap_or(0)
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|e| StoreError::persistence(std::io::Error::other(e.to_string())))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|e| StoreError::persistence(std::io::Error::other(e.to_string())))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create_session(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRecord> {
        let mut guard = self.write()?;
        let record = guard
            .sessions
            .entry(id.clone())
            .or_insert_with(|| SessionRecord::new(id.clone(), now));
        Ok(record.clone())
    }

    async fn find_session(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        Ok(self.read()?.sessions.get(id).cloned())
    }

    async fn list_sessions(&self, page: Page) -> StoreResult<Vec<SessionRecord>> {
        let guard = self.read()?;
        let mut records: Vec<SessionRecord> = guard.sessions.values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(records
            .into_iter()
            .skip(page.skip)
            .take(page.limit)
            .collect())
    }

    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let session_id = message.session_id();

        let record = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;

        if state.message_ids.contains(&message.id()) {
            return Err(StoreError::DuplicateMessage(message.id()));
        }

        let expected = record.next_sequence();
        if message.sequence_number() != expected {
            return Err(StoreError::SequenceConflict {
                session_id: session_id.clone(),
                expected,
                actual: message.sequence_number(),
            });
        }

        record.record_message(message.created_at());
        state.message_ids.insert(message.id());
        state
            .messages
            .entry(session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, id: &SessionId) -> StoreResult<Vec<Message>> {
        let guard = self.read()?;
        let mut messages = guard.messages.get(id).cloned().unwrap_or_default();
        messages.sort_by_key(Message::sequence_number);
        Ok(messages)
    }

    async fn increment_usage(&self, id: &SessionId, usage: &TurnUsage) -> StoreResult<()> {
        let mut guard = self.write()?;
        let record = guard
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))?;
        record.record_usage(usage);
        Ok(())
    }

    async fn update_metadata(
        &self,
        id: &SessionId,
        metadata: SessionMetadata,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRecord> {
        let mut guard = self.write()?;
        let record = guard
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::SessionNotFound(id.clone()))?;
        record.metadata = metadata;
        record.updated_at = now;
        Ok(record.clone())
    }

    async fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        let mut guard = self.write()?;
        let state = &mut *guard;
        let existed = state.sessions.remove(id).is_some();
        if let Some(messages) = state.messages.remove(id) {
            for message in messages {
                state.message_ids.remove(&message.id());
            }
        }
        Ok(existed)
    }
}
