//! When steps for streaming session BDD scenarios.

use super::world::{SessionWorld, run_async};
use eyre::WrapErr;
use palaver::session::{
    adapters::channel::channel_pair,
    domain::SessionId,
    ports::transport::InboundFrame,
    services::{SessionChannel, TurnUpdate},
};
use rstest_bdd_macros::when;

#[when(r#"a new session is opened with "{text}""#)]
fn open_new_session(world: &mut SessionWorld, text: String) -> Result<(), eyre::Report> {
    let stream = run_async(world.manager.open_session(&text)).wrap_err("open session")?;
    world.updates = run_async(stream.collect());
    world.session = world.updates.iter().find_map(|update| match update {
        TurnUpdate::SessionBound(id) => Some(id.clone()),
        _ => None,
    });
    Ok(())
}

#[when(r#"a client resumes session "{id}""#)]
fn client_resumes(world: &mut SessionWorld, id: String) -> Result<(), eyre::Report> {
    let session_id = SessionId::new(id).wrap_err("invalid session id")?;
    let (transport, mut client) = channel_pair(16);
    let channel = SessionChannel::new(world.manager.clone(), transport);
    tokio::spawn(channel.run());
    run_async(client.send(&InboundFrame::Resume { session_id })).wrap_err("send resume")?;
    let frame = run_async(client.recv()).wrap_err("receive replay")?;
    world.frames.push(frame);
    world.client = Some(client);
    Ok(())
}

#[when(r#"a second turn "{text}" is submitted"#)]
fn submit_second_turn(world: &mut SessionWorld, text: String) -> Result<(), eyre::Report> {
    let session = world.session()?.clone();
    let outcome = run_async(world.manager.submit_turn(&session, &text));
    world.submission = Some(outcome.map(drop));
    Ok(())
}

#[when("the streaming turn is allowed to finish")]
fn finish_streaming_turn(world: &mut SessionWorld) -> Result<(), eyre::Report> {
    let stream = world
        .in_flight
        .take()
        .ok_or_else(|| eyre::eyre!("no turn is streaming"))?;
    let gate = world
        .gate
        .take()
        .ok_or_else(|| eyre::eyre!("no gate holds the turn"))?;
    gate.notify_one();
    world.updates = run_async(stream.collect());
    Ok(())
}
