//! Queue primitive implementations.
//!
//! This module contains concrete implementations of the `QueuePrimitive`
//! trait: the kernel System-V queue and an in-memory emulation.

pub mod memory;
#[cfg(target_os = "linux")]
pub mod sysv;

pub use memory::InMemoryPrimitive;
#[cfg(target_os = "linux")]
pub use sysv::SysVPrimitive;
