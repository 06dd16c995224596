//! Step definitions for streaming session scenarios.

mod given;
mod when;
