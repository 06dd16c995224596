//! Sequence enforcement against `PostgreSQL`.

use std::io;

use crate::postgres_store::helpers::{
    BoxError, PreparedStore, clock, fresh_session, prepared_store, runtime, user_message,
};
use mockable::{Clock, DefaultClock};
use palaver::session::ports::store::{SessionStore, StoreError};
use rstest::rstest;
use tokio::runtime::Runtime;

#[rstest]
#[case::gap(2)]
#[case::repeat(0)]
fn out_of_order_sequence_is_rejected(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
    #[case] rejected: u64,
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
            .create_message(&user_message(&clock, &session, 0, "first")),
    )?;

    let result = rt.block_on(
        prepared
            .store
            .create_message(&user_message(&clock, &session, rejected, "stray")),
    );

    assert!(matches!(
        result,
        Err(StoreError::SequenceConflict { expected, .. }) if expected.value() == 1
    ));
    let record = rt
        .block_on(prepared.store.find_session(&session))?
        .ok_or("session missing")?;
    assert_eq!(record.message_count, 1);
    Ok(())
}

#[rstest]
fn duplicate_message_id_is_reported(
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
    let message = user_message(&clock, &session, 0, "once");
    rt.block_on(prepared.store.create_message(&message))?;

    let result = rt.block_on(prepared.store.create_message(&message));

    assert!(matches!(
        result,
        Err(StoreError::DuplicateMessage(id)) if id == message.id()
    ));
    Ok(())
}

#[rstest]
fn resubmitted_message_is_a_duplicate_after_the_session_moved_on(
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
    let first = user_message(&clock, &session, 0, "first");
    rt.block_on(prepared.store.create_message(&first))?;
    rt.block_on(
        prepared
            .store
            .create_message(&user_message(&clock, &session, 1, "second")),
    )?;

    let result = rt.block_on(prepared.store.create_message(&first));

    assert!(matches!(
        result,
        Err(StoreError::DuplicateMessage(id)) if id == first.id()
    ));
    let record = rt
        .block_on(prepared.store.find_session(&session))?
        .ok_or("session missing")?;
    assert_eq!(record.message_count, 2);
    Ok(())
}

#[rstest]
fn message_for_unknown_session_is_rejected(
    runtime: io::Result<Runtime>,
    prepared_store: Result<Option<PreparedStore>, BoxError>,
    clock: DefaultClock,
) -> Result<(), BoxError> {
    let Some(prepared) = prepared_store? else {
        return Ok(());
    };
    let rt = runtime?;
    let session = fresh_session()?;

    let result = rt.block_on(
        prepared
            .store
            .create_message(&user_message(&clock, &session, 0, "orphan")),
    );

    assert!(matches!(result, Err(StoreError::SessionNotFound(_))));
    Ok(())
}

#[rstest]
fn concurrent_appends_at_the_same_sequence_admit_one(
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
    let left = user_message(&clock, &session, 0, "left");
    let right = user_message(&clock, &session, 0, "right");

    let (first, second) = rt.block_on(async {
        tokio::join!(
            prepared.store.create_message(&left),
            prepared.store.create_message(&right)
        )
    });

    assert_eq!(u8::from(first.is_ok()) + u8::from(second.is_ok()), 1);
    assert_eq!(rt.block_on(prepared.store.list_messages(&session))?.len(), 1);
    Ok(())
}
