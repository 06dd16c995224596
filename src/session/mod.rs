//! Streaming session engine.
//!
//! One logical conversation is multiplexed onto one long-lived upstream
//! agent connection. Incremental stream events are folded into durable
//! messages, and stored history is replayed on resume ahead of any live
//! event.
//!
//! # Architecture
//!
//! - **Domain**: pure data ([`domain::Message`], [`domain::ContentBlock`],
//!   [`domain::StreamEvent`], [`domain::SessionRecord`])
//! - **Ports**: [`ports::SessionStore`], [`ports::AgentUpstream`],
//!   [`ports::Transport`]
//! - **Adapters**: in-memory, `PostgreSQL`, channel transport and a
//!   scripted upstream
//! - **Services**: [`services::StreamAccumulator`],
//!   [`services::SessionManager`], [`services::SessionChannel`],
//!   [`services::SessionCatalog`]
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use mockable::DefaultClock;
//! use palaver::session::domain::{SequenceNumber, SessionId, StreamEvent};
//! use palaver::session::services::{StreamAccumulator, ToolConventions};
//!
//! let accumulator = StreamAccumulator::new(ToolConventions::default(), Arc::new(DefaultClock));
//! let mut turn = accumulator.begin_turn(
//!     SessionId::new("sess-1").expect("valid id"),
//!     SequenceNumber::new(1),
//! );
//! accumulator.apply(&mut turn, StreamEvent::reasoning("thinking"));
//! accumulator.apply(&mut turn, StreamEvent::prose("done"));
//! accumulator.apply(&mut turn, StreamEvent::complete());
//! let message = accumulator.finalize(turn).expect("completed turn");
//! assert_eq!(message.content().len(), 2);
//! ```

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
