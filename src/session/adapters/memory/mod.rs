//! In-process adapters for tests and embedded hosts.

mod store;
mod upstream;

pub use store::InMemorySessionStore;
pub use upstream::{ScriptStep, ScriptedUpstream, TurnScript};
