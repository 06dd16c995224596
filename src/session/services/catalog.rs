//! Read and metadata-edit access to stored sessions.

use std::sync::Arc;

use mockable::Clock;

use crate::session::{
    domain::{Message, Page, SessionId, SessionMetadata, SessionRecord},
    error::{ManagerError, ManagerResult},
    ports::store::{SessionStore, StoreError},
};

/// A stored session with its ordered messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDetail {
    /// The session record.
    pub record: SessionRecord,
    /// Messages in sequence order.
    pub messages: Vec<Message>,
}

/// Persistence wrapper for listing, inspecting and annotating sessions.
#[derive(Clone)]
pub struct SessionCatalog<S, K>
where
    S: SessionStore,
    K: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<K>,
}

impl<S, K> SessionCatalog<S, K>
where
    S: SessionStore,
    K: Clock + Send + Sync,
{
    /// Creates a catalog over the given store.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<K>) -> Self {
        Self { store, clock }
    }

    /// Lists sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Persistence`] if the store fails.
    pub async fn list(&self, page: Page) -> ManagerResult<Vec<SessionRecord>> {
        Ok(self.store.list_sessions(page).await?)
    }

    /// Returns a session and its messages.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] for unknown identities.
    pub async fn detail(&self, session_id: &SessionId) -> ManagerResult<SessionDetail> {
        let record = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.clone()))?;
        let messages = self.store.list_messages(session_id).await?;
        Ok(SessionDetail { record, messages })
    }

    /// Replaces the session's title, tags and owner.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] for unknown identities.
    pub async fn update_metadata(
        &self,
        session_id: &SessionId,
        metadata: SessionMetadata,
    ) -> ManagerResult<SessionRecord> {
        self.store
            .update_metadata(session_id, metadata, self.clock.utc())
            .await
            .map_err(|err| match err {
                StoreError::SessionNotFound(id) => ManagerError::SessionNotFound(id),
                other => ManagerError::Persistence(other),
            })
    }

    /// Sets the session title, keeping tags and owner.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::SessionNotFound`] for unknown identities.
    pub async fn rename(
        &self,
        session_id: &SessionId,
        title: impl Into<String> + Send,
    ) -> ManagerResult<SessionRecord> {
        let detail = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(|| ManagerError::SessionNotFound(session_id.clone()))?;
        let metadata = SessionMetadata {
            title: Some(title.into()),
            ..detail.metadata
        };
        self.update_metadata(session_id, metadata).await
    }
}
