//! Partial and failed turns still reach the store.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::session_flow::helpers::{Engine, TestResult, engine, runtime, script};
use palaver::session::{
    domain::{Role, StreamEvent, TurnUsage},
    ports::store::SessionStore,
    services::{TurnFailure, TurnUpdate},
};
use rstest::rstest;
use tokio::runtime::Runtime;
use tokio::sync::Notify;

#[rstest]
fn turn_error_after_one_delta_keeps_the_partial(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        engine.upstream.push_turn(script([
            StreamEvent::prose("Partial"),
            StreamEvent::error("rate limited"),
        ]));

        let (id, updates) = engine.open("hello").await?;
        let history = engine.history(&id).await?;

        assert!(matches!(
            updates.last(),
            Some(TurnUpdate::Failed(TurnFailure::Upstream { .. }))
        ));
        let assistant = history.last().ok_or("no assistant message")?;
        assert_eq!(assistant.role(), Role::Assistant);
        assert_eq!(assistant.text(), "Partial");
        assert!(assistant.metadata().is_failed());
        Ok(())
    })
}

#[rstest]
fn closing_mid_turn_stores_what_streamed(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("hello").await?;
        let gate = Arc::new(Notify::new());
        engine.upstream.push_turn(
            script([StreamEvent::prose("Half an answer")])
                .gate(Arc::clone(&gate))
                .event(StreamEvent::complete()),
        );
        let mut stream = engine.manager.submit_turn(&id, "long one").await?;
        stream.next().await;

        engine.manager.close(&id).await?;
        let rest = stream.collect().await;

        assert!(matches!(
            rest.last(),
            Some(TurnUpdate::Failed(TurnFailure::Upstream { .. }))
        ));
        let history = engine.history(&id).await?;
        let assistant = history.last().ok_or("no assistant message")?;
        assert_eq!(assistant.text(), "Half an answer");
        assert!(assistant.metadata().is_failed());
        Ok(())
    })
}

#[rstest]
fn detached_turn_is_stored_when_it_completes(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("hello").await?;
        engine.upstream.push_turn(
            script([StreamEvent::prose("Nobody")])
                .pause(Duration::from_millis(20))
                .event(StreamEvent::prose(" listening"))
                .event(StreamEvent::complete()),
        );

        drop(engine.manager.submit_turn(&id, "anyone?").await?);
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.manager.is_turn_in_flight(&id).await {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        let history = engine.history(&id).await?;
        let assistant = history.last().ok_or("no assistant message")?;
        assert_eq!(assistant.text(), "Nobody listening");
        assert!(!assistant.metadata().is_failed());
        Ok(())
    })
}

#[rstest]
fn usage_accumulates_on_the_session_record(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let billed = || {
            script([
                StreamEvent::prose("ok"),
                StreamEvent::TurnComplete {
                    usage: Some(TurnUsage::new(1_500, 20, 5)),
                },
            ])
        };
        engine.upstream.push_turn(billed());
        let (id, _) = engine.open("one").await?;
        engine.upstream.push_turn(billed());
        engine.turn(&id, "two").await?;

        let record = engine
            .store
            .find_session(&id)
            .await?
            .ok_or("session record missing")?;

        assert_eq!(record.usage.cost_micro_usd, 3_000);
        assert_eq!(record.usage.input_tokens, 40);
        assert_eq!(record.usage.output_tokens, 10);
        assert_eq!(record.message_count, 4);
        Ok(())
    })
}
