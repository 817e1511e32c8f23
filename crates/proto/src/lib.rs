//! Shared protocol types for the session engine, transport, and terminal UI.
//!
//! This crate defines the messages exchanged between a stream producer, the
//! session engine, and the render loop, plus the strongly-typed error enums
//! shared across the workspace.

pub mod error;
pub mod event;

/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of producer and engine event types.
pub use event::{EngineEvent, StreamFailure, StreamMessage};
