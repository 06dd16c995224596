//! Gap-free sequence numbers across turns, failures and restarts.

use std::io;
use std::sync::Arc;

use crate::session_flow::helpers::{Engine, TestResult, engine, runtime, script, sequences};
use palaver::session::domain::StreamEvent;
use rstest::rstest;
use tokio::runtime::Runtime;

#[rstest]
fn sequences_stay_contiguous_over_many_turns(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("turn 0").await?;
        for turn in 1..5 {
            engine.turn(&id, &format!("turn {turn}")).await?;
        }

        let history = engine.history(&id).await?;

        assert_eq!(sequences(&history), (0..10).collect::<Vec<_>>());
        Ok(())
    })
}

#[rstest]
fn failed_turns_consume_sequence_numbers(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("hello").await?;
        engine
            .upstream
            .push_turn(script([StreamEvent::prose("half")]).fail("agent crashed"));
        engine.turn(&id, "break").await?;
        engine.upstream.fail_next_send("socket closed");
        engine.turn(&id, "again").await?;
        engine.turn(&id, "recovered").await?;

        let history = engine.history(&id).await?;

        assert_eq!(sequences(&history), (0..8).collect::<Vec<_>>());
        Ok(())
    })
}

#[rstest]
fn sequences_continue_after_restart(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("before").await?;
        engine.manager.shutdown().await;

        let restarted = Engine::over(Arc::clone(&engine.store));
        restarted.manager.resume(&id).await?;
        restarted.turn(&id, "after").await?;

        let history = restarted.history(&id).await?;
        assert_eq!(sequences(&history), vec![0, 1, 2, 3]);
        Ok(())
    })
}

#[rstest]
fn sessions_number_independently(runtime: io::Result<Runtime>, engine: Engine) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (first, _) = engine.open("one").await?;
        let (second, _) = engine.open("two").await?;
        engine.turn(&first, "one more").await?;

        assert_eq!(sequences(&engine.history(&first).await?), vec![0, 1, 2, 3]);
        assert_eq!(sequences(&engine.history(&second).await?), vec![0, 1]);
        Ok(())
    })
}
