//! `PostgreSQL` implementation of the `SessionStore` port.

use super::{
    models::{MessageRow, NewMessageRow, NewSessionRow, SessionRow},
    schema::{agent_sessions, session_messages},
};
use crate::session::{
    domain::{
        Message, MessageId, Page, PersistedMessageData, Role, SequenceNumber, SessionId,
        SessionMetadata, SessionRecord, TurnUsage, UsageTotals,
    },
    ports::store::{SessionStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, DatabaseErrorInformation, Error as DieselError};

/// `PostgreSQL` connection pool type used by the session store.
pub type SessionPgPool = Pool<ConnectionManager<PgConnection>>;

const SEQUENCE_CONSTRAINT: &str = "session_messages_session_sequence_key";

/// `PostgreSQL`-backed session store.
///
/// All Diesel calls run on the blocking thread pool via
/// [`tokio::task::spawn_blocking`]. `create_message` locks the session row
/// with `SELECT ... FOR UPDATE`, so the sequence check, the insert and the
/// counter increment commit together. A message whose id is already stored
/// is reported as [`StoreError::DuplicateMessage`] before any sequence
/// check, so a retried insert is recognisable however far the session has
/// moved on.
///
/// Usage totals are not part of that transaction: `increment_usage` is its
/// own statement and callers apply it once the message is stored.
///
/// # Example
///
/// ```ignore
/// use diesel::r2d2::{ConnectionManager, Pool};
/// use diesel::PgConnection;
/// use palaver::session::adapters::postgres::PostgresSessionStore;
///
/// let manager = ConnectionManager::<PgConnection>::new("postgres://...");
/// let pool = Pool::builder().build(manager).expect("pool");
/// let store = PostgresSessionStore::new(pool);
/// ```
#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: SessionPgPool,
}

impl PostgresSessionStore {
    /// Creates a store from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: SessionPgPool) -> Self {
        Self { pool }
    }

    /// Builds a pool for the given database URL and wraps it in a store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Persistence`] if the pool cannot be built.
    pub fn connect(url: &str, pool_size: u32) -> StoreResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(url);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(StoreError::persistence)?;
        Ok(Self::new(pool))
    }

    async fn run_blocking<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(StoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(StoreError::persistence)?
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        Self::persistence(err)
    }
}

#[async_trait]
impl SessionStore for PostgresSessionStore {
    async fn get_or_create_session(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRecord> {
        let new_row = to_new_session_row(&SessionRecord::new(id.clone(), now))?;
        let id_str = id.as_str().to_owned();

        self.run_blocking(move |connection| {
            diesel::insert_into(agent_sessions::table)
                .values(&new_row)
                .on_conflict(agent_sessions::id)
                .do_nothing()
                .execute(connection)?;
            let row = agent_sessions::table
                .filter(agent_sessions::id.eq(&id_str))
                .select(SessionRow::as_select())
                .first::<SessionRow>(connection)?;
            row_to_record(row)
        })
        .await
    }

    async fn find_session(&self, id: &SessionId) -> StoreResult<Option<SessionRecord>> {
        let id_str = id.as_str().to_owned();
        self.run_blocking(move |connection| {
            let row = agent_sessions::table
                .filter(agent_sessions::id.eq(&id_str))
                .select(SessionRow::as_select())
                .first::<SessionRow>(connection)
                .optional()?;
            row.map(row_to_record).transpose()
        })
        .await
    }

    async fn list_sessions(&self, page: Page) -> StoreResult<Vec<SessionRecord>> {
        let limit = i64::try_from(page.limit).map_err(StoreError::serialization)?;
        let offset = i64::try_from(page.skip).map_err(StoreError::serialization)?;
        self.run_blocking(move |connection| {
            let rows = agent_sessions::table
                .order((agent_sessions::created_at.desc(), agent_sessions::id.asc()))
                .limit(limit)
                .offset(offset)
                .select(SessionRow::as_select())
                .load::<SessionRow>(connection)?;
            rows.into_iter().map(row_to_record).collect()
        })
        .await
    }

    async fn create_message(&self, message: &Message) -> StoreResult<()> {
        let new_row = to_new_message_row(message)?;
        let session_id = message.session_id().clone();
        let message_id = message.id();
        let sequence = message.sequence_number();
        let created_at = message.created_at();

        self.run_blocking(move |connection| {
            connection.transaction::<_, StoreError, _>(|tx| {
                let count = agent_sessions::table
                    .filter(agent_sessions::id.eq(session_id.as_str()))
                    .select(agent_sessions::message_count)
                    .for_update()
                    .first::<i64>(tx)
                    .optional()?
                    .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;

                let already_stored = diesel::select(diesel::dsl::exists(
                    session_messages::table.filter(session_messages::id.eq(message_id.into_inner())),
                ))
                .get_result::<bool>(tx)?;
                if already_stored {
                    return Err(StoreError::DuplicateMessage(message_id));
                }

                let expected =
                    SequenceNumber::new(u64::try_from(count).map_err(StoreError::serialization)?);
                if expected != sequence {
                    return Err(StoreError::SequenceConflict {
                        session_id: session_id.clone(),
                        expected,
                        actual: sequence,
                    });
                }

                diesel::insert_into(session_messages::table)
                    .values(&new_row)
                    .execute(tx)
                    .map_err(|err| map_insert_error(err, &session_id, expected, sequence, message_id))?;

                diesel::update(agent_sessions::table.filter(agent_sessions::id.eq(session_id.as_str())))
                    .set((
                        agent_sessions::message_count.eq(agent_sessions::message_count + 1_i64),
                        agent_sessions::updated_at.eq(created_at),
                    ))
                    .execute(tx)?;
                Ok(())
            })
        })
        .await
    }

    async fn list_messages(&self, id: &SessionId) -> StoreResult<Vec<Message>> {
        let id_str = id.as_str().to_owned();
        self.run_blocking(move |connection| {
            let rows = session_messages::table
                .filter(session_messages::session_id.eq(&id_str))
                .order(session_messages::sequence_number.asc())
                .select(MessageRow::as_select())
                .load::<MessageRow>(connection)?;
            rows.into_iter().map(row_to_message).collect()
        })
        .await
    }

    async fn increment_usage(&self, id: &SessionId, usage: &TurnUsage) -> StoreResult<()> {
        let cost = to_i64(usage.cost_micro_usd)?;
        let input = to_i64(usage.input_tokens)?;
        let output = to_i64(usage.output_tokens)?;
        let session_id = id.clone();

        self.run_blocking(move |connection| {
            let updated = diesel::update(
                agent_sessions::table.filter(agent_sessions::id.eq(session_id.as_str())),
            )
            .set((
                agent_sessions::total_cost_micro_usd
                    .eq(agent_sessions::total_cost_micro_usd + cost),
                agent_sessions::total_input_tokens.eq(agent_sessions::total_input_tokens + input),
                agent_sessions::total_output_tokens
                    .eq(agent_sessions::total_output_tokens + output),
            ))
            .execute(connection)?;
            if updated == 0 {
                return Err(StoreError::SessionNotFound(session_id));
            }
            Ok(())
        })
        .await
    }

    async fn update_metadata(
        &self,
        id: &SessionId,
        metadata: SessionMetadata,
        now: DateTime<Utc>,
    ) -> StoreResult<SessionRecord> {
        let metadata_val = serde_json::to_value(&metadata).map_err(StoreError::serialization)?;
        let session_id = id.clone();

        self.run_blocking(move |connection| {
            let row = diesel::update(
                agent_sessions::table.filter(agent_sessions::id.eq(session_id.as_str())),
            )
            .set((
                agent_sessions::metadata.eq(&metadata_val),
                agent_sessions::updated_at.eq(now),
            ))
            .returning(SessionRow::as_returning())
            .get_result::<SessionRow>(connection)
            .optional()?
            .ok_or_else(|| StoreError::SessionNotFound(session_id.clone()))?;
            row_to_record(row)
        })
        .await
    }

    async fn delete_session(&self, id: &SessionId) -> StoreResult<bool> {
        let id_str = id.as_str().to_owned();
        self.run_blocking(move |connection| {
            let deleted =
                diesel::delete(agent_sessions::table.filter(agent_sessions::id.eq(&id_str)))
                    .execute(connection)?;
            Ok(deleted > 0)
        })
        .await
    }
}

fn map_insert_error(
    err: DieselError,
    session_id: &SessionId,
    expected: SequenceNumber,
    actual: SequenceNumber,
    message_id: MessageId,
) -> StoreError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
            if is_sequence_violation(info.as_ref()) =>
        {
            StoreError::SequenceConflict {
                session_id: session_id.clone(),
                expected,
                actual,
            }
        }
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            StoreError::DuplicateMessage(message_id)
        }
        other => StoreError::persistence(other),
    }
}

fn is_sequence_violation(info: &dyn DatabaseErrorInformation) -> bool {
    info.constraint_name() == Some(SEQUENCE_CONSTRAINT)
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(StoreError::serialization)
}

fn to_u64(value: i64) -> StoreResult<u64> {
    u64::try_from(value).map_err(StoreError::serialization)
}

fn to_new_session_row(record: &SessionRecord) -> StoreResult<NewSessionRow> {
    Ok(NewSessionRow {
        id: record.id.as_str().to_owned(),
        created_at: record.created_at,
        updated_at: record.updated_at,
        message_count: to_i64(record.message_count)?,
        total_cost_micro_usd: to_i64(record.usage.cost_micro_usd)?,
        total_input_tokens: to_i64(record.usage.input_tokens)?,
        total_output_tokens: to_i64(record.usage.output_tokens)?,
        metadata: serde_json::to_value(&record.metadata).map_err(StoreError::serialization)?,
    })
}

fn row_to_record(row: SessionRow) -> StoreResult<SessionRecord> {
    let SessionRow {
        id,
        created_at,
        updated_at,
        message_count,
        total_cost_micro_usd,
        total_input_tokens,
        total_output_tokens,
        metadata,
    } = row;

    Ok(SessionRecord {
        id: SessionId::new(id).map_err(StoreError::serialization)?,
        created_at,
        updated_at,
        message_count: to_u64(message_count)?,
        usage: UsageTotals {
            cost_micro_usd: to_u64(total_cost_micro_usd)?,
            input_tokens: to_u64(total_input_tokens)?,
            output_tokens: to_u64(total_output_tokens)?,
        },
        metadata: serde_json::from_value(metadata).map_err(StoreError::serialization)?,
    })
}

fn to_new_message_row(message: &Message) -> StoreResult<NewMessageRow> {
    let usage = message
        .usage()
        .map(serde_json::to_value)
        .transpose()
        .map_err(StoreError::serialization)?;
    let duration_ms = message.duration_ms().map(to_i64).transpose()?;

    Ok(NewMessageRow {
        id: message.id().into_inner(),
        session_id: message.session_id().as_str().to_owned(),
        sequence_number: to_i64(message.sequence_number().value())?,
        role: message.role().as_str().to_owned(),
        content: serde_json::to_value(message.content()).map_err(StoreError::serialization)?,
        metadata: serde_json::to_value(message.metadata()).map_err(StoreError::serialization)?,
        usage,
        duration_ms,
        created_at: message.created_at(),
    })
}

fn row_to_message(row: MessageRow) -> StoreResult<Message> {
    let MessageRow {
        id,
        session_id,
        sequence_number,
        role,
        content,
        metadata,
        usage,
        duration_ms,
        created_at,
    } = row;

    Ok(Message::from_persisted(PersistedMessageData {
        id: MessageId::from_uuid(id),
        session_id: SessionId::new(session_id).map_err(StoreError::serialization)?,
        sequence_number: SequenceNumber::new(to_u64(sequence_number)?),
        role: Role::try_from(role.as_str()).map_err(StoreError::serialization)?,
        content: serde_json::from_value(content).map_err(StoreError::serialization)?,
        metadata: serde_json::from_value(metadata).map_err(StoreError::serialization)?,
        usage: usage
            .map(serde_json::from_value)
            .transpose()
            .map_err(StoreError::serialization)?,
        duration_ms: duration_ms.map(to_u64).transpose()?,
        created_at,
    }))
}
