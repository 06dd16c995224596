//! Application services for the session subsystem.
//!
//! Services orchestrate the ports: the accumulator folds stream events,
//! the manager owns live upstream connections, the channel driver speaks
//! to one client and the catalog wraps stored sessions.

mod accumulator;
mod catalog;
mod channel;
mod manager;
mod turn;

pub use accumulator::{
    DEFAULT_TASK_LIST_TOOL, OutboundUpdate, StreamAccumulator, ToolConventions, TurnHandle,
    TurnState,
};
pub use catalog::{SessionCatalog, SessionDetail};
pub use channel::{ChannelExit, ChannelState, SessionChannel};
pub use manager::{ManagerConfig, ResumedSession, SessionManager};
pub use turn::{TurnFailure, TurnStream, TurnUpdate};
