//! Session and message persistence against `PostgreSQL`.

use std::io;

use crate::postgres_store::helpers::{
    BoxError, PreparedStore, clock, fresh_session, prepared_store, runtime, user_message,
};
use mockable::{Clock, DefaultClock};
use palaver::session::{
    domain::{
        ContentBlock, Message, Page, Role, SequenceNumber, SessionMetadata, ToolInvocationBlock,
        TurnUsage,
    },
    ports::store::SessionStore,
};
use rstest::rstest;
use serde_json::json;
use tokio::runtime::Runtime;

#[rstest]
fn session_is_created_once(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let session = fresh_session()?;

    let first = rt.block_on(prepared.store.get_or_create_session(&session, clock.utc()))?;
    let second = rt.block_on(prepared.store.get_or_create_session(&session, clock.utc()))?;

    assert_eq!(first.id, second.id);
    assert_eq!(first.created_at, second.created_at);
    assert_eq!(second.message_count, 0);
    Ok(())
}

#[rstest]
fn assistant_message_keeps_blocks_usage_and_metadata(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let session = fresh_session()?;
    rt.block_on(prepared.store.get_or_create_session(&session, clock.utc()))?;
    let answer = Message::builder(session.clone(), Role::Assistant, SequenceNumber::new(1))
        .with_blocks([
            ContentBlock::reasoning("thinking"),
            ContentBlock::ToolInvocation(ToolInvocationBlock::new(
                "Search",
                json!({"q": "x"}),
            )),
            ContentBlock::prose("done"),
        ])
        .with_usage(Some(TurnUsage::new(1_200, 30, 8)))
        .with_duration_ms(Some(640))
        .build(&clock);

    rt.block_on(
        prepared
            .store
            .create_message(&user_message(&clock, &session, 0, "find x")),
    )?;
    rt.block_on(prepared.store.create_message(&answer))?;
    let stored = rt.block_on(prepared.store.list_messages(&session))?;

    assert_eq!(stored.len(), 2);
    let reloaded = stored.last().ok_or("assistant message missing")?;
    assert_eq!(reloaded.id(), answer.id());
    assert_eq!(reloaded.content(), answer.content());
    assert_eq!(reloaded.usage(), answer.usage());
    assert_eq!(reloaded.duration_ms(), Some(640));
    assert_eq!(reloaded.metadata(), answer.metadata());
    Ok(())
}

#[rstest]
fn storing_a_message_leaves_usage_totals_to_increment_usage(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let session = fresh_session()?;
    rt.block_on(prepared.store.get_or_create_session(&session, clock.utc()))?;
    let usage = TurnUsage::new(700, 12, 4);
    let answer = Message::builder(session.clone(), Role::Assistant, SequenceNumber::new(0))
        .with_blocks([ContentBlock::prose("done")])
        .with_usage(Some(usage))
        .build(&clock);

    rt.block_on(prepared.store.create_message(&answer))?;
    let stored_only = rt
        .block_on(prepared.store.find_session(&session))?
        .ok_or("session missing")?;
    rt.block_on(prepared.store.increment_usage(&session, &usage))?;
    let counted = rt
        .block_on(prepared.store.find_session(&session))?
        .ok_or("session missing")?;

    assert_eq!(stored_only.message_count, 1);
    assert_eq!(stored_only.usage.cost_micro_usd, 0);
    assert_eq!(counted.usage.cost_micro_usd, 700);
    assert_eq!(counted.usage.output_tokens, 4);
    Ok(())
}

#[rstest]
fn usage_totals_accumulate(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let session = fresh_session()?;
    rt.block_on(prepared.store.get_or_create_session(&session, clock.utc()))?;

    for _ in 0..3 {
        rt.block_on(
            prepared
                .store
                .increment_usage(&session, &TurnUsage::new(500, 10, 2)),
        )?;
    }
    let record = rt
        .block_on(prepared.store.find_session(&session))?
        .ok_or("session missing")?;

    assert_eq!(record.usage.cost_micro_usd, 1_500);
    assert_eq!(record.usage.input_tokens, 30);
    assert_eq!(record.usage.output_tokens, 6);
    Ok(())
}

#[rstest]
fn metadata_updates_and_listing(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let older = fresh_session()?;
    let newer = fresh_session()?;
    rt.block_on(
        prepared
            .store
            .get_or_create_session(&older, clock.utc() - chrono::Duration::minutes(5)),
    )?;
    rt.block_on(prepared.store.get_or_create_session(&newer, clock.utc()))?;

    let renamed = rt.block_on(prepared.store.update_metadata(
        &older,
        SessionMetadata::titled("Research").with_tag("work"),
        clock.utc(),
    ))?;
    let listed = rt.block_on(prepared.store.list_sessions(Page::default()))?;
    let first_page = rt.block_on(prepared.store.list_sessions(Page::new(1, 0)))?;

    assert_eq!(renamed.metadata.title.as_deref(), Some("Research"));
    assert_eq!(renamed.metadata.tags, vec!["work".to_owned()]);
    let ids: Vec<_> = listed.iter().map(|record| record.id.clone()).collect();
    assert_eq!(ids, vec![newer.clone(), older]);
    assert_eq!(
        first_page.first().map(|record| record.id.clone()),
        Some(newer)
    );
    Ok(())
}

#[rstest]
fn delete_removes_messages(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let session = fresh_session()?;
    rt.block_on(prepared.store.get_or_create_session(&session, clock.utc()))?;
    rt.block_on(
        prepared
            .store
            .create_message(&user_message(&clock, &session, 0, "hello")),
    )?;

    assert!(rt.block_on(prepared.store.delete_session(&session))?);
    assert!(!rt.block_on(prepared.store.delete_session(&session))?);
    assert!(rt.block_on(prepared.store.list_messages(&session))?.is_empty());
    assert!(rt.block_on(prepared.store.find_session(&session))?.is_none());
    Ok(())
}
