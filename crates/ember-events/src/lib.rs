//! # ember-events
//!
//! Typed engine events and the broadcast bus that carries them.
//!
//! - **[`EngineEvent`]**: every externally observable state transition of the
//!   context engine (message appended, compression lifecycle, snapshot
//!   lifecycle, memory pressure, rollover, resize)
//! - **[`EventBus`]**: a `tokio::sync::broadcast` wrapper owned by the
//!   façade; emitting never blocks or fails, and dropping a receiver
//!   unsubscribes it. No module-level singletons.

#![deny(unsafe_code)]

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventReceiver};
pub use types::{BaseEvent, CompressionSkipReason, EngineEvent};
