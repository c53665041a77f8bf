//! End-to-end test support for the memory engine
//!
//! The harness module provides a synthetic embedding provider with pinned
//! vectors so journeys can reason about exact similarities.

pub mod harness;
