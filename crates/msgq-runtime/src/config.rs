//! Primitive types and session configuration.

use crate::error::ConfigurationError;
use crate::message::{QueueKey, DEFAULT_PERMISSIONS};
use serde::{Deserialize, Serialize};

/// Enumeration of supported queue primitives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimitiveType {
    /// Kernel System-V message queues
    SysV,
    /// Process-local emulation
    InMemory,
}

impl PrimitiveType {
    /// Check if queues created through this primitive are visible to other processes
    pub fn is_shared_across_processes(&self) -> bool {
        match self {
            Self::SysV => true,
            Self::InMemory => false,
        }
    }

    /// Check if the primitive is usable on the current platform
    pub fn is_available(&self) -> bool {
        match self {
            Self::SysV => cfg!(target_os = "linux"),
            Self::InMemory => true,
        }
    }
}

/// Configuration for opening a queue session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue key; required before a session can be opened
    pub key: Option<QueueKey>,
    /// Permissions in hex-digit layout, e.g. `0x666`
    pub permissions: u32,
    pub primitive: PrimitiveConfig,
    pub session: SessionOptions,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            key: None,
            permissions: DEFAULT_PERMISSIONS,
            primitive: PrimitiveConfig::Kernel,
            session: SessionOptions::default(),
        }
    }
}

impl QueueConfig {
    /// Check values serde cannot reject on its own
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let digits = [
            self.permissions >> 8,
            (self.permissions >> 4) & 0xf,
            self.permissions & 0xf,
        ];
        if self.permissions > 0xfff || digits.iter().any(|digit| *digit > 7) {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "permissions {:#x} must use digits 0-7 for owner, group and other",
                    self.permissions
                ),
            });
        }

        if let PrimitiveConfig::InMemory(memory) = &self.primitive {
            if memory.max_message_size > memory.max_queue_bytes {
                return Err(ConfigurationError::Invalid {
                    message: "max_message_size exceeds max_queue_bytes".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Primitive-specific configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PrimitiveConfig {
    Kernel,
    InMemory(InMemoryConfig),
}

impl PrimitiveConfig {
    pub fn primitive_type(&self) -> PrimitiveType {
        match self {
            Self::Kernel => PrimitiveType::SysV,
            Self::InMemory(_) => PrimitiveType::InMemory,
        }
    }
}

/// In-memory primitive configuration
///
/// Defaults mirror the Linux `MSGMAX` and `MSGMNB` limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Largest payload accepted by send
    pub max_message_size: usize,
    /// Byte capacity of a single queue
    pub max_queue_bytes: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_message_size: 8192,
            max_queue_bytes: 16384,
        }
    }
}

/// Behaviour of a session beyond the primitive itself
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOptions {
    pub pending: PendingCacheConfig,
    pub cache_lookup: CacheLookup,
}

/// Bounds for messages received by the consumer loop with nobody subscribed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingCacheConfig {
    /// Maximum number of cached messages; `None` leaves the cache unbounded
    pub capacity: Option<usize>,
    pub overflow: OverflowPolicy,
}

impl Default for PendingCacheConfig {
    fn default() -> Self {
        Self {
            capacity: Some(1024),
            overflow: OverflowPolicy::DropOldest,
        }
    }
}

/// What happens when the pending cache is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the oldest cached message to make room
    #[default]
    DropOldest,
    /// Keep every message and stop the consumer loop until the cache drains
    StopLoop,
}

/// How a pull receive matches cached messages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheLookup {
    /// Cached messages only satisfy requests whose type filter they match
    #[default]
    TypeAware,
    /// Any cached message satisfies any request
    AnyType,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
