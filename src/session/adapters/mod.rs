//! Adapters implementing the session ports.
//!
//! - [`memory::InMemorySessionStore`]: thread-safe in-memory storage
//! - [`memory::ScriptedUpstream`]: deterministic scripted agent
//! - [`channel::ChannelTransport`]: JSON frames over in-process channels
//! - [`postgres::PostgresSessionStore`]: `PostgreSQL` persistence using
//!   Diesel ORM

pub mod channel;
pub mod memory;
pub mod postgres;
