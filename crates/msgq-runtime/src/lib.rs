//! # Msgq Runtime
//!
//! Client sessions on System-V typed message queues.
//!
//! This library provides:
//! - Opening or creating a queue by integer key with hex-written permissions
//! - Sending payloads tagged with a positive message type
//! - Selective pull receives by type (any, exact, lowest-below)
//! - Subscriptions fed by a lazily started, self-terminating consumer loop
//! - A pending cache for messages that arrive while nobody is subscribed
//!
//! ## Module Organization
//!
//! - [error] - Error types for all queue operations
//! - [message] - Keys, permissions, message types and received messages
//! - [config] - Session and primitive configuration
//! - [primitive] - The interface to the underlying queue primitive
//! - [primitives] - Kernel and in-memory primitive implementations
//! - [session] - Session lifecycle, sending and receiving

// Module declarations
pub mod config;
pub mod consumer;
pub mod error;
pub mod message;
pub mod pending;
pub mod primitive;
pub mod primitives;
mod receiver;
mod sender;
pub mod session;

#[cfg(test)]
mod test_support;

// Re-export commonly used types at crate root for convenience
pub use config::{
    CacheLookup, InMemoryConfig, OverflowPolicy, PendingCacheConfig, PrimitiveConfig,
    PrimitiveType, QueueConfig, SessionOptions,
};
pub use consumer::{ConsumerState, Subscription};
pub use error::{ConfigurationError, PrimitiveOperation, QueueError, ValidationError};
pub use message::{
    CreationFlags, MessageType, Permissions, QueueHandle, QueueKey, QueueStats, ReceiveOptions,
    ReceivedMessage, SendOptions, TypeSelector, DEFAULT_PERMISSIONS, DEFAULT_SEND_TYPE, IPC_CREAT,
    IPC_EXCL, IPC_NOWAIT, MAX_MESSAGE_SIZE, MSG_EXCEPT, MSG_NOERROR,
};
pub use primitive::QueuePrimitive;
pub use primitives::InMemoryPrimitive;
#[cfg(target_os = "linux")]
pub use primitives::SysVPrimitive;
pub use session::MessageQueue;
