//! Given steps for streaming session BDD scenarios.

use std::sync::Arc;

use super::world::{SessionWorld, run_async};
use eyre::WrapErr;
use mockable::DefaultClock;
use palaver::session::{
    adapters::memory::TurnScript,
    domain::{ContentBlock, Message, Role, SequenceNumber, SessionId, StreamEvent},
    ports::store::SessionStore,
    services::TurnUpdate,
};
use rstest_bdd_macros::given;
use serde_json::json;
use tokio::sync::Notify;

#[given(r#"the agent will answer "{first}" then "{second}""#)]
fn agent_answers_in_two_deltas(world: &mut SessionWorld, first: String, second: String) {
    world.upstream.push_turn(TurnScript::from_events([
        StreamEvent::prose(first),
        StreamEvent::prose(second),
        StreamEvent::complete(),
    ]));
}

#[given("the agent will think, search and then answer")]
fn agent_thinks_searches_and_answers(world: &mut SessionWorld) {
    world.upstream.push_turn(TurnScript::from_events([
        StreamEvent::reasoning("thinking"),
        StreamEvent::tool_invocation("Search", json!({"q": "x"})),
        StreamEvent::prose("done"),
        StreamEvent::complete(),
    ]));
}

#[given(r#"a stored session "{id}" with {count:usize} messages"#)]
fn stored_session_with_messages(
    world: &mut SessionWorld,
    id: String,
    count: usize,
) -> Result<(), eyre::Report> {
    let session = SessionId::new(id).wrap_err("invalid session id")?;
    let clock = DefaultClock;
    run_async(async {
        world
            .store
            .get_or_create_session(&session, chrono::Utc::now())
            .await
            .wrap_err("create session")?;
        for index in 0..count {
            let sequence = SequenceNumber::new(u64::try_from(index)?);
            let message = if index % 2 == 0 {
                Message::user(session.clone(), sequence, format!("question {index}"), &clock)
            } else {
                Message::builder(session.clone(), Role::Assistant, sequence)
                    .with_block(ContentBlock::prose(format!("answer {index}")))
                    .build(&clock)
            };
            world
                .store
                .create_message(&message)
                .await
                .wrap_err("seed message")?;
        }
        Ok::<(), eyre::Report>(())
    })?;
    world.session = Some(session);
    Ok(())
}

#[given(r#"a bound session whose turn has streamed "{streamed}" and holds "{held}""#)]
fn bound_session_mid_stream(
    world: &mut SessionWorld,
    streamed: String,
    held: String,
) -> Result<(), eyre::Report> {
    let gate = Arc::new(Notify::new());
    world.upstream.push_turn(
        TurnScript::from_events([StreamEvent::prose(streamed)])
            .gate(Arc::clone(&gate))
            .event(StreamEvent::prose(held))
            .event(StreamEvent::complete()),
    );
    let mut stream = run_async(world.manager.open_session("hello")).wrap_err("open session")?;
    let Some(TurnUpdate::SessionBound(session)) = run_async(stream.next()) else {
        return Err(eyre::eyre!("expected the session to bind first"));
    };
    let Some(TurnUpdate::Stream(_)) = run_async(stream.next()) else {
        return Err(eyre::eyre!("expected the first delta"));
    };
    world.session = Some(session);
    world.in_flight = Some(stream);
    world.gate = Some(gate);
    Ok(())
}
