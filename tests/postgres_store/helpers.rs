//! Shared test helpers for `PostgreSQL` integration tests.

use std::io;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use mockable::DefaultClock;
use palaver::session::{
    adapters::postgres::PostgresSessionStore,
    domain::{Message, SequenceNumber, SessionId},
};
use rstest::fixture;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// Environment variable naming the test server.
pub const TEST_SERVER_ENV: &str = "PALAVER_TEST_POSTGRES";

/// SQL creating the session schema.
pub const CREATE_SCHEMA_SQL: &str =
    include_str!("../../migrations/2026-01-01-000000_create_sessions/up.sql");

/// Boxed error used by test bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Provides a tokio runtime for the blocking-pool store calls.
///
/// # Errors
///
/// Returns an error if the runtime cannot be created.
#[fixture]
pub fn runtime() -> io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
}

/// A database created for one test and dropped with it.
pub struct TemporaryDatabase {
    server: String,
    name: String,
}

impl TemporaryDatabase {
    /// Creates a database on `server` and applies the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the server is unreachable or the schema fails.
    pub fn create(server: &str) -> Result<Self, BoxError> {
        let name = format!("palaver_test_{}", Uuid::new_v4().simple());
        let mut admin = PgConnection::establish(&format!("{server}/postgres"))?;
        admin.batch_execute(&format!("CREATE DATABASE \"{name}\""))?;
        let database = Self {
            server: server.to_owned(),
            name,
        };
        PgConnection::establish(&database.url())?.batch_execute(CREATE_SCHEMA_SQL)?;
        Ok(database)
    }

    /// Returns the connection URL of the database.
    #[must_use]
    pub fn url(&self) -> String {
        format!("{}/{}", self.server, self.name)
    }
}

impl Drop for TemporaryDatabase {
    fn drop(&mut self) {
        if let Ok(mut admin) = PgConnection::establish(&format!("{}/postgres", self.server)) {
            let sql = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.name);
            admin.batch_execute(&sql).ok();
        }
    }
}

/// A store over a fresh database.
pub struct PreparedStore {
    /// The store under test.
    pub store: PostgresSessionStore,
    /// Backing database; dropped after the store.
    pub database: TemporaryDatabase,
}

/// Prepares a store when a test server is configured.
///
/// # Errors
///
/// Returns an error if the configured server cannot be prepared.
#[fixture]
pub fn prepared_store() -> Result<Option<PreparedStore>, BoxError> {
    let Ok(server) = std::env::var(TEST_SERVER_ENV) else {
        return Ok(None);
    };
    let database = TemporaryDatabase::create(server.trim_end_matches('/'))?;
    let store = PostgresSessionStore::connect(&database.url(), 2)?;
    Ok(Some(PreparedStore { store, database }))
}

/// Provides a [`DefaultClock`] for test fixtures.
#[fixture]
pub fn clock() -> DefaultClock {
    DefaultClock
}

/// Builds a session identity unique to the calling test.
///
/// # Errors
///
/// Returns an error if the identity is rejected.
pub fn fresh_session() -> Result<SessionId, BoxError> {
    Ok(SessionId::new(format!("sess-{}", Uuid::new_v4()))?)
}

/// Creates a user message at `sequence`.
#[must_use]
pub fn user_message(
    clock: &DefaultClock,
    session: &SessionId,
    sequence: u64,
    text: &str,
) -> Message {
    Message::user(session.clone(), SequenceNumber::new(sequence), text, clock)
}
