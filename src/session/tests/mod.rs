//! Unit tests for the session module.
//!
//! Tests are organised by component: domain data, the stream accumulator,
//! the in-memory adapters, the wire codec, the connection manager and the
//! channel driver.

mod support;
