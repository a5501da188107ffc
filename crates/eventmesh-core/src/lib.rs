//! Eventmesh Core — shared abstractions.
//!
//! This crate defines the collaborators the bus and the aggregator depend on:
//! a clock, a write-only state store, a named timer registry and the
//! environment-driven configuration helpers. It contains no event logic.

pub mod clock;
pub mod config;
pub mod error;
pub mod store;
pub mod timer;
