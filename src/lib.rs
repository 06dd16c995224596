//! Palaver: a streaming session engine for conversational agents.
//!
//! Each client conversation is bound to one long-lived upstream agent
//! connection. The engine turns the upstream's incremental stream events
//! into durable, ordered messages, forwards them to the client as they
//! arrive and replays stored history when a client resumes.
//!
//! # Architecture
//!
//! Palaver follows hexagonal architecture principles:
//!
//! - **Domain**: Pure data with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for storage, upstream and transport
//! - **Adapters**: Concrete implementations of ports (in-memory, `PostgreSQL`,
//!   channels)
//!
//! # Modules
//!
//! - [`session`]: Session lifecycle, stream accumulation and persistence
//! - [`config`]: TOML configuration with defaults

pub mod config;
pub mod session;
