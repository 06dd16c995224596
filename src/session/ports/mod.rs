//! Port trait definitions for the session subsystem.
//!
//! Ports define the abstract interfaces the engine requires from
//! infrastructure: durable storage, the upstream agent and the client
//! channel. Adapters implement these ports.

pub mod store;
pub mod transport;
pub mod upstream;

pub use store::{SessionStore, StoreError, StoreResult};
pub use transport::{
    DeltaKind, InboundFrame, OutboundFrame, Transport, TransportError, TransportResult,
};
pub use upstream::{AgentConnection, AgentUpstream, UpstreamError, UpstreamEvent, UpstreamResult};
