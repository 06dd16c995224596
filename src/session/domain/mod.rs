//! Domain types for the session subsystem.
//!
//! Pure data with no infrastructure dependencies: identifiers, content
//! blocks, stream events, messages and session records. All types are
//! serialisable via serde.

mod content;
mod event;
mod ids;
mod message;
mod record;
mod role;
mod usage;

pub use content::{
    BlockKind, ContentBlock, TaskItem, TaskStatus, TextBlock, ToolConvention,
    ToolInvocationBlock, ToolResultBlock,
};
pub use event::StreamEvent;
pub use ids::{
    ContinuationToken, EmptySessionIdError, MessageId, SequenceNumber, SessionId, TurnId,
};
pub use message::{Message, MessageBuilder, MessageMetadata, PersistedMessageData, TurnStatus};
pub use record::{Page, SessionMetadata, SessionRecord};
pub use role::{ParseRoleError, Role};
pub use usage::{TurnUsage, UsageTotals};
