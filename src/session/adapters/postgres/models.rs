//! Diesel row models for session persistence.

use super::schema::{agent_sessions, session_messages};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for session records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = agent_sessions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SessionRow {
    /// Session identity.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Stored message count.
    pub message_count: i64,
    /// Cumulative cost in micro-dollars.
    pub total_cost_micro_usd: i64,
    /// Cumulative prompt-side tokens.
    pub total_input_tokens: i64,
    /// Cumulative agent-produced tokens.
    pub total_output_tokens: i64,
    /// Metadata JSON payload.
    pub metadata: Value,
}

/// Insert model for session records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = agent_sessions)]
pub struct NewSessionRow {
    /// Session identity.
    pub id: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
    /// Stored message count.
    pub message_count: i64,
    /// Cumulative cost in micro-dollars.
    pub total_cost_micro_usd: i64,
    /// Cumulative prompt-side tokens.
    pub total_input_tokens: i64,
    /// Cumulative agent-produced tokens.
    pub total_output_tokens: i64,
    /// Metadata JSON payload.
    pub metadata: Value,
}

/// Query result row for messages.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = session_messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MessageRow {
    /// Message identifier.
    pub id: uuid::Uuid,
    /// Owning session.
    pub session_id: String,
    /// Position within the session.
    pub sequence_number: i64,
    /// Author role.
    pub role: String,
    /// Content blocks JSON payload.
    pub content: Value,
    /// Turn metadata JSON payload.
    pub metadata: Value,
    /// Turn usage JSON payload.
    pub usage: Option<Value>,
    /// Streaming duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Insert model for messages.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = session_messages)]
pub struct NewMessageRow {
    /// Message identifier.
    pub id: uuid::Uuid,
    /// Owning session.
    pub session_id: String,
    /// Position within the session.
    pub sequence_number: i64,
    /// Author role.
    pub role: String,
    /// Content blocks JSON payload.
    pub content: Value,
    /// Turn metadata JSON payload.
    pub metadata: Value,
    /// Turn usage JSON payload.
    pub usage: Option<Value>,
    /// Streaming duration in milliseconds.
    pub duration_ms: Option<i64>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
