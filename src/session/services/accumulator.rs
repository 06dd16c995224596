//! Stream accumulator: folds one turn's stream events into a message.
//!
//! The accumulator never suspends. Each [`StreamAccumulator::apply`] call
//! updates the in-flight [`TurnHandle`] and returns at most one outbound
//! update carrying only what the event added, so the transport stays
//! delta-oriented while the stored message holds merged totals.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::session::{
    domain::{
        ContentBlock, Message, MessageMetadata, Role, SequenceNumber, SessionId, StreamEvent,
        TaskItem, ToolConvention, ToolInvocationBlock, ToolResultBlock, TurnId, TurnUsage,
    },
    error::TurnFailed,
    ports::transport::{DeltaKind, OutboundFrame},
};

/// Default tool name published by agents that keep a task list.
pub const DEFAULT_TASK_LIST_TOOL: &str = "TodoWrite";

/// Tool names with a recognised specialised payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConventions {
    task_list_tools: Vec<String>,
}

impl ToolConventions {
    /// Creates conventions recognising the given task-list tool names.
    #[must_use]
    pub fn new(task_list_tools: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            task_list_tools: task_list_tools.into_iter().map(Into::into).collect(),
        }
    }

    /// Creates conventions that recognise nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            task_list_tools: Vec::new(),
        }
    }

    /// Returns the specialised shape for an invocation, if its tool name
    /// follows a known convention and its input parses.
    #[must_use]
    pub fn recognise(&self, name: &str, input: &Value) -> Option<ToolConvention> {
        if !self.task_list_tools.iter().any(|tool| tool == name) {
            return None;
        }
        let todos = input.get("todos")?.clone();
        match serde_json::from_value::<Vec<TaskItem>>(todos) {
            Ok(tasks) => Some(ToolConvention::TaskList { tasks }),
            Err(err) => {
                debug!(tool = name, error = %err, "Task list input did not parse; keeping generic shape");
                None
            }
        }
    }
}

impl Default for ToolConventions {
    fn default() -> Self {
        Self::new([DEFAULT_TASK_LIST_TOOL])
    }
}

/// Terminal state of a turn handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnState {
    /// No terminal event yet.
    Streaming,
    /// The upstream signalled `turn-complete`.
    Completed,
    /// The upstream signalled `turn-error`, or the stream was lost.
    Failed(String),
}

/// The in-flight message being assembled for one turn.
#[derive(Debug, Clone)]
pub struct TurnHandle {
    turn_id: TurnId,
    session_id: SessionId,
    sequence: SequenceNumber,
    blocks: Vec<ContentBlock>,
    state: TurnState,
    usage: Option<TurnUsage>,
    started_at: DateTime<Utc>,
}

impl TurnHandle {
    /// Returns the turn identifier.
    #[must_use]
    pub const fn turn_id(&self) -> TurnId {
        self.turn_id
    }

    /// Returns the owning session.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Returns the sequence number the finalized message will carry.
    #[must_use]
    pub const fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Returns the blocks assembled so far.
    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        &self.blocks
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> &TurnState {
        &self.state
    }

    /// Returns `true` once a terminal event has been applied.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self.state, TurnState::Streaming)
    }

    /// Returns the usage figures observed so far.
    #[must_use]
    pub const fn usage(&self) -> Option<&TurnUsage> {
        self.usage.as_ref()
    }
}

/// An incremental update produced by applying one event.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundUpdate {
    /// A text fragment; only the fragment, never the running total.
    Delta {
        /// Reasoning or prose.
        kind: DeltaKind,
        /// The fragment.
        text: String,
    },
    /// A new tool invocation block.
    ToolInvocation(ToolInvocationBlock),
    /// A new tool result block.
    ToolResult(ToolResultBlock),
}

impl From<OutboundUpdate> for OutboundFrame {
    fn from(update: OutboundUpdate) -> Self {
        match update {
            OutboundUpdate::Delta { kind, text } => Self::Delta {
                content_type: kind,
                text,
            },
            OutboundUpdate::ToolInvocation(block) => Self::ToolInvocation {
                call_id: block.call_id,
                name: block.name,
                input: block.input,
                convention: block.convention,
            },
            OutboundUpdate::ToolResult(block) => Self::ToolResult {
                call_id: block.call_id,
                content: block.content,
                is_error: block.is_error,
            },
        }
    }
}

/// Folds stream events into content blocks.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use mockable::DefaultClock;
/// use palaver::session::domain::{SequenceNumber, SessionId, StreamEvent};
/// use palaver::session::services::{StreamAccumulator, ToolConventions};
///
/// let accumulator = StreamAccumulator::new(ToolConventions::default(), Arc::new(DefaultClock));
/// let session = SessionId::new("sess-1").expect("valid id");
/// let mut turn = accumulator.begin_turn(session, SequenceNumber::new(1));
/// accumulator.apply(&mut turn, StreamEvent::prose("Hi"));
/// accumulator.apply(&mut turn, StreamEvent::prose(" there"));
/// accumulator.apply(&mut turn, StreamEvent::complete());
///
/// let message = accumulator.finalize(turn).expect("completed turn");
/// assert_eq!(message.content().len(), 1);
/// assert_eq!(message.text(), "Hi there");
/// ```
#[derive(Debug)]
pub struct StreamAccumulator<K: Clock> {
    conventions: ToolConventions,
    clock: Arc<K>,
}

impl<K: Clock> StreamAccumulator<K> {
    /// Creates an accumulator.
    #[must_use]
    pub const fn new(conventions: ToolConventions, clock: Arc<K>) -> Self {
        Self { conventions, clock }
    }

    /// Returns the recognised tool conventions.
    #[must_use]
    pub const fn conventions(&self) -> &ToolConventions {
        &self.conventions
    }

    /// Starts assembling the assistant message for one turn.
    #[must_use]
    pub fn begin_turn(&self, session_id: SessionId, sequence: SequenceNumber) -> TurnHandle {
        let turn_id = TurnId::new();
        debug!(session_id = %session_id, sequence = %sequence, turn_id = %turn_id, "Turn started");
        TurnHandle {
            turn_id,
            session_id,
            sequence,
            blocks: Vec::new(),
            state: TurnState::Streaming,
            usage: None,
            started_at: self.clock.utc(),
        }
    }

    /// Applies one event in arrival order.
    ///
    /// Same-kind text deltas extend the last block; tool events always
    /// start a new block. Terminal events change state and produce no
    /// update. Events arriving after a terminal event are ignored.
    pub fn apply(&self, handle: &mut TurnHandle, event: StreamEvent) -> Option<OutboundUpdate> {
        if handle.is_terminal() {
            warn!(
                session_id = %handle.session_id,
                turn_id = %handle.turn_id,
                "Ignoring stream event after terminal event"
            );
            return None;
        }

        match event {
            StreamEvent::ReasoningDelta { text } => {
                Some(append_delta(&mut handle.blocks, DeltaKind::Reasoning, text))
            }
            StreamEvent::ProseDelta { text } => {
                Some(append_delta(&mut handle.blocks, DeltaKind::Prose, text))
            }
            StreamEvent::ToolInvocation {
                call_id,
                name,
                input,
            } => {
                let convention = self.conventions.recognise(&name, &input);
                let block = ToolInvocationBlock {
                    call_id,
                    name,
                    input,
                    convention,
                };
                handle
                    .blocks
                    .push(ContentBlock::ToolInvocation(block.clone()));
                Some(OutboundUpdate::ToolInvocation(block))
            }
            StreamEvent::ToolResult {
                call_id,
                content,
                is_error,
            } => {
                let block = ToolResultBlock {
                    call_id,
                    content,
                    is_error,
                };
                handle.blocks.push(ContentBlock::ToolResult(block.clone()));
                Some(OutboundUpdate::ToolResult(block))
            }
            StreamEvent::TurnComplete { usage } => {
                if usage.is_some() {
                    handle.usage = usage;
                }
                handle.state = TurnState::Completed;
                None
            }
            StreamEvent::TurnError { message } => {
                handle.state = TurnState::Failed(message);
                None
            }
        }
    }

    /// Finalizes the turn into an assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`TurnFailed`] when the turn did not complete. It carries
    /// the partial message, which must still be stored.
    pub fn finalize(&self, handle: TurnHandle) -> Result<Message, TurnFailed> {
        let TurnHandle {
            turn_id,
            session_id,
            sequence,
            blocks,
            state,
            usage,
            started_at,
        } = handle;

        let elapsed = self.clock.utc().signed_duration_since(started_at);
        let duration_ms = u64::try_from(elapsed.num_milliseconds()).ok();
        let metadata = MessageMetadata::empty().with_turn_id(turn_id);
        let builder = Message::builder(session_id, Role::Assistant, sequence)
            .with_blocks(blocks)
            .with_usage(usage)
            .with_duration_ms(duration_ms);

        let reason = match state {
            TurnState::Completed => {
                return Ok(builder
                    .with_metadata(metadata.completed())
                    .build(self.clock.as_ref()));
            }
            TurnState::Failed(reason) => reason,
            TurnState::Streaming => "stream ended before a terminal event".to_owned(),
        };

        let partial = builder
            .with_metadata(metadata.failed(reason.clone()))
            .build(self.clock.as_ref());
        Err(TurnFailed {
            reason,
            partial: Box::new(partial),
        })
    }
}

fn append_delta(blocks: &mut Vec<ContentBlock>, kind: DeltaKind, text: String) -> OutboundUpdate {
    match (blocks.last_mut(), kind) {
        (Some(ContentBlock::Reasoning(block)), DeltaKind::Reasoning)
        | (Some(ContentBlock::Prose(block)), DeltaKind::Prose) => block.append(&text),
        (_, DeltaKind::Reasoning) => blocks.push(ContentBlock::reasoning(text.as_str())),
        (_, DeltaKind::Prose) => blocks.push(ContentBlock::prose(text.as_str())),
    }
    OutboundUpdate::Delta { kind, text }
}
