//! # ember-device
//!
//! Device memory probing and context pool sizing.
//!
//! - **[`DeviceQuery`]**: thin wrappers over vendor tools (nvidia-smi,
//!   rocm-smi) plus a system-RAM fallback; all of them fail silently
//! - **[`VramProbe`]**: polls while a request is in flight, emits
//!   `low_memory`, and degrades to a conservative profile derived from the
//!   loaded model's parameter count; this component never errors
//! - **[`ContextPool`]**: derives the token pool from free memory and KV
//!   quantization, and guards resizes against the live token total

#![deny(unsafe_code)]

pub mod memory;
pub mod pool;
pub mod probe;

pub use memory::{
    default_queries, DeviceMemory, DeviceQuery, NvidiaSmiQuery, RocmSmiQuery, SystemRamQuery,
};
pub use pool::ContextPool;
pub use probe::{fallback_profile, ProbeConfig, VramProbe};
