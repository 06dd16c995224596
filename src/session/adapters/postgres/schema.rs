//! Diesel schema for session persistence.

diesel::table! {
    /// One row per resumable conversation.
    agent_sessions (id) {
        /// Upstream-assigned session identity.
        #[max_length = 255]
        id -> Varchar,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Last update timestamp.
        updated_at -> Timestamptz,
        /// Number of stored messages; also the next sequence number.
        message_count -> Int8,
        /// Cumulative cost in micro-dollars.
        total_cost_micro_usd -> Int8,
        /// Cumulative prompt-side tokens.
        total_input_tokens -> Int8,
        /// Cumulative agent-produced tokens.
        total_output_tokens -> Int8,
        /// Title, tags and owner as JSONB.
        metadata -> Jsonb,
    }
}

diesel::table! {
    /// Finalized messages, unique per (session, sequence).
    session_messages (id) {
        /// Message identifier.
        id -> Uuid,
        /// Owning session.
        #[max_length = 255]
        session_id -> Varchar,
        /// Position within the session.
        sequence_number -> Int8,
        /// Author role.
        #[max_length = 20]
        role -> Varchar,
        /// Content blocks as JSONB.
        content -> Jsonb,
        /// Turn metadata as JSONB.
        metadata -> Jsonb,
        /// Turn usage as JSONB, when reported.
        usage -> Nullable<Jsonb>,
        /// Streaming duration in milliseconds, when measured.
        duration_ms -> Nullable<Int8>,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::joinable!(session_messages -> agent_sessions (session_id));
diesel::allow_tables_to_appear_in_same_query!(agent_sessions, session_messages);
