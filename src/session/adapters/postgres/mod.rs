//! `PostgreSQL` adapter for session persistence.

mod models;
mod repository;
mod schema;

pub use repository::{PostgresSessionStore, SessionPgPool};
