//! Session record: identity, timestamps, counters and free-form metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{SequenceNumber, SessionId, TurnUsage, UsageTotals};

/// Durable metadata of one resumable conversation.
///
/// `message_count` is also the next sequence number to assign, so the store
/// can reject gaps and duplicates on insert.
///
/// # Examples
///
/// ```
/// use palaver::session::domain::{SessionId, SessionRecord};
/// use chrono::Utc;
///
/// let record = SessionRecord::new(SessionId::new("sess-7").expect("id"), Utc::now());
/// assert_eq!(record.message_count, 0);
/// assert_eq!(record.next_sequence().value(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Upstream-assigned identity; immutable.
    pub id: SessionId,
    /// When the session was first persisted.
    pub created_at: DateTime<Utc>,
    /// Last mutation of counters or metadata.
    pub updated_at: DateTime<Utc>,
    /// Number of stored messages.
    pub message_count: u64,
    /// Cumulative cost and token counters.
    pub usage: UsageTotals,
    /// Title, tags and owner.
    pub metadata: SessionMetadata,
}

impl SessionRecord {
    /// Creates an empty session record.
    #[must_use]
    pub fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at: now,
            updated_at: now,
            message_count: 0,
            usage: UsageTotals::default(),
            metadata: SessionMetadata::default(),
        }
    }

    /// Returns the sequence number the next stored message must carry.
    #[must_use]
    pub const fn next_sequence(&self) -> SequenceNumber {
        SequenceNumber::new(self.message_count)
    }

    /// Records one appended message.
    pub const fn record_message(&mut self, at: DateTime<Utc>) {
        self.message_count = self.message_count.saturating_add(1);
        self.updated_at = at;
    }

    /// Adds one turn's usage to the cumulative totals.
    pub const fn record_usage(&mut self, usage: &TurnUsage) {
        self.usage.add(usage);
    }
}

/// Free-form session metadata edited by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    /// Display title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// User-assigned tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Owning user, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl SessionMetadata {
    /// Creates metadata with a title.
    #[must_use]
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Adds a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Offset pagination for session listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Maximum number of entries to return.
    pub limit: usize,
    /// Number of entries to skip.
    pub skip: usize,
}

impl Page {
    /// Creates a page request.
    #[must_use]
    pub const fn new(limit: usize, skip: usize) -> Self {
        Self { limit, skip }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new(20, 0)
    }
}
