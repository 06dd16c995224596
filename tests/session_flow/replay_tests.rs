//! History replay on resume.
//!
//! A resumed session replays exactly what the store holds, in sequence
//! order, and replaying twice yields identical history.

use std::io;
use std::sync::Arc;

use crate::session_flow::helpers::{Engine, TestResult, engine, runtime, script, sequences};
use palaver::session::{
    adapters::channel::channel_pair,
    domain::StreamEvent,
    ports::transport::{InboundFrame, OutboundFrame},
    services::SessionChannel,
};
use rstest::rstest;
use tokio::runtime::Runtime;

#[rstest]
fn resume_after_restart_replays_every_stored_message(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("hello").await?;
        engine.turn(&id, "and then?").await?;
        engine.manager.shutdown().await;

        let restarted = Engine::over(Arc::clone(&engine.store));
        let resumed = restarted.manager.resume(&id).await?;

        assert_eq!(resumed.history, engine.history(&id).await?);
        assert_eq!(sequences(&resumed.history), vec![0, 1, 2, 3]);
        assert_eq!(resumed.record.message_count, 4);
        Ok(())
    })
}

#[rstest]
fn replaying_twice_yields_identical_history(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        engine.upstream.push_turn(script([
            StreamEvent::reasoning("Thinking."),
            StreamEvent::prose("Answer."),
            StreamEvent::complete(),
        ]));
        let (id, _) = engine.open("question").await?;

        let first = engine.manager.resume(&id).await?;
        let second = engine.manager.resume(&id).await?;

        assert_eq!(
            serde_json::to_string(&first.history)?,
            serde_json::to_string(&second.history)?
        );
        Ok(())
    })
}

#[rstest]
fn channel_resume_sends_history_before_any_live_frame(
    runtime: io::Result<Runtime>,
    engine: Engine,
) -> TestResult {
    let rt = runtime?;
    rt.block_on(async {
        let (id, _) = engine.open("hello").await?;
        let (transport, mut client) = channel_pair(16);
        let channel = SessionChannel::new(engine.manager.clone(), transport);
        let task = tokio::spawn(channel.run());

        client
            .send(&InboundFrame::Resume {
                session_id: id.clone(),
            })
            .await?;
        let replay = client.recv().await?;
        engine
            .upstream
            .push_turn(script([StreamEvent::prose("Back."), StreamEvent::complete()]));
        client
            .send(&InboundFrame::NewTurn {
                text: "again".to_owned(),
            })
            .await?;
        let live = client.recv().await?;

        let OutboundFrame::History { messages } = replay else {
            return Err("first frame after resume must be history".into());
        };
        assert_eq!(messages.len(), 2);
        assert!(matches!(live, OutboundFrame::Delta { .. }));
        drop(client);
        let exit = task.await?;
        assert_eq!(exit.session_id, Some(id));
        Ok(())
    })
}
