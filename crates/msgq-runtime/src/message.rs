//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Contract Constants
// ============================================================================

/// Flag requesting creation of the queue when the key is not yet in use
pub const IPC_CREAT: i32 = 0o1000;

/// Flag making open fail when the queue already exists
pub const IPC_EXCL: i32 = 0o2000;

/// Flag making send and receive return immediately instead of blocking
pub const IPC_NOWAIT: i32 = 0o4000;

/// Receive flag truncating messages longer than the receive buffer
pub const MSG_NOERROR: i32 = 0o10000;

/// Receive flag selecting the first message whose type differs from the filter
pub const MSG_EXCEPT: i32 = 0o20000;

/// Largest payload a single receive will accept
pub const MAX_MESSAGE_SIZE: usize = 4052;

/// Permissions used when the caller does not supply any
pub const DEFAULT_PERMISSIONS: u32 = 0x666;

/// Type assigned to outbound messages when the caller does not supply one
pub const DEFAULT_SEND_TYPE: i64 = 1;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue key (the kernel's `key_t`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey(i32);

impl QueueKey {
    /// Key requesting a fresh queue that no other key can reach
    pub const PRIVATE: QueueKey = QueueKey(0);

    pub fn new(key: i32) -> Self {
        Self(key)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for QueueKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for QueueKey {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

impl TryFrom<i64> for QueueKey {
    type Error = ValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        i32::try_from(value)
            .map(Self)
            .map_err(|_| ValidationError::OutOfRange {
                field: "key".to_string(),
                message: format!("{} does not fit in a 32-bit queue key", value),
            })
    }
}

impl FromStr for QueueKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = parse_integer(s.trim(), "key")?;
        Self::try_from(value)
    }
}

/// Access permissions written one hex digit per class, e.g. `0x666`
///
/// Each digit holds the rwx bits of owner, group and other. The kernel wants
/// the same bits in octal layout, see [`Permissions::mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions(u32);

impl Permissions {
    pub fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Re-encode the hex-digit layout into the kernel's octal mode bits
    ///
    /// All three bits of each class are kept, so `0x777` becomes `0o777`.
    /// Message queues ignore the execute bit; some other clients mask it off
    /// and would open the same queue with `0o666`.
    pub fn mode(&self) -> i32 {
        let other = self.0 & 0x007;
        let group = (self.0 & 0x070) >> 1;
        let owner = (self.0 & 0x700) >> 2;
        (other | group | owner) as i32
    }

    /// Flags passed to the primitive when opening a queue
    pub fn creation_flags(&self) -> CreationFlags {
        CreationFlags(IPC_CREAT | self.mode())
    }
}

impl Default for Permissions {
    fn default() -> Self {
        Self(DEFAULT_PERMISSIONS)
    }
}

impl From<u32> for Permissions {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl FromStr for Permissions {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = parse_integer(s.trim(), "permissions")?;
        u32::try_from(value)
            .map(Self)
            .map_err(|_| ValidationError::OutOfRange {
                field: "permissions".to_string(),
                message: format!("{} is not a valid permission value", value),
            })
    }
}

/// Flags combining `IPC_CREAT` with re-encoded permission bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreationFlags(i32);

impl CreationFlags {
    pub fn bits(&self) -> i32 {
        self.0
    }

    pub fn creates(&self) -> bool {
        self.0 & IPC_CREAT != 0
    }

    pub fn mode(&self) -> i32 {
        self.0 & 0o777
    }
}

impl From<i32> for CreationFlags {
    fn from(value: i32) -> Self {
        Self(value)
    }
}

/// Identifier returned by the primitive for an open queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueHandle(i32);

impl QueueHandle {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn id(&self) -> i32 {
        self.0
    }
}

impl std::fmt::Display for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Positive message type attached at send time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageType(i64);

impl MessageType {
    /// Create message type with validation
    pub fn new(value: i64) -> Result<Self, ValidationError> {
        if value <= 0 {
            return Err(ValidationError::OutOfRange {
                field: "message_type".to_string(),
                message: format!("must be a positive nonzero integer, got {}", value),
            });
        }

        Ok(Self(value))
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl Default for MessageType {
    fn default() -> Self {
        Self(DEFAULT_SEND_TYPE)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receive-side type filter
///
/// `0` takes the oldest message of any type, a positive value the oldest
/// message of exactly that type, and a negative value the oldest message with
/// the lowest type not above its absolute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TypeSelector(i64);

impl TypeSelector {
    pub const ANY: TypeSelector = TypeSelector(0);

    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn is_any(&self) -> bool {
        self.0 == 0
    }

    /// Pick the index of the message this selector takes from `types`
    ///
    /// `types` must be in arrival order. With `except` set, a positive
    /// selector takes the first message whose type differs from it.
    pub fn select<I>(&self, types: I, except: bool) -> Option<usize>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut types = types.into_iter().enumerate();
        match self.0 {
            0 => types.next().map(|(index, _)| index),
            wanted if wanted > 0 && except => types
                .find(|(_, message_type)| *message_type != wanted)
                .map(|(index, _)| index),
            wanted if wanted > 0 => types
                .find(|(_, message_type)| *message_type == wanted)
                .map(|(index, _)| index),
            bound => {
                let ceiling = bound.checked_neg().unwrap_or(i64::MAX);
                types
                    .filter(|(_, message_type)| *message_type <= ceiling)
                    .fold(None, |best: Option<(usize, i64)>, (index, message_type)| {
                        match best {
                            Some((_, lowest)) if lowest <= message_type => best,
                            _ => Some((index, message_type)),
                        }
                    })
                    .map(|(index, _)| index)
            }
        }
    }
}

impl From<i64> for TypeSelector {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<MessageType> for TypeSelector {
    fn from(value: MessageType) -> Self {
        Self(value.value())
    }
}

// ============================================================================
// Operation Options
// ============================================================================

/// Options for sending a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Message type; `None` sends with type 1
    pub message_type: Option<i64>,
    /// Flags forwarded to the primitive unchanged
    pub flags: i32,
}

impl SendOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, message_type: i64) -> Self {
        self.message_type = Some(message_type);
        self
    }

    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }

    /// Validate and resolve the outbound message type
    pub fn resolved_type(&self) -> Result<MessageType, ValidationError> {
        match self.message_type {
            Some(value) => MessageType::new(value),
            None => Ok(MessageType::default()),
        }
    }
}

/// Options for receiving a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveOptions {
    /// Type filter; defaults to any type
    pub selector: TypeSelector,
    /// Flags forwarded to the primitive unchanged
    pub flags: i32,
}

impl ReceiveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, selector: impl Into<TypeSelector>) -> Self {
        self.selector = selector.into();
        self
    }

    pub fn with_flags(mut self, flags: i32) -> Self {
        self.flags = flags;
        self
    }
}

// ============================================================================
// Received Messages and Queue Status
// ============================================================================

/// A message taken off the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Type the message was sent with
    pub message_type: i64,
    /// Raw payload
    pub body: Bytes,
}

impl ReceivedMessage {
    pub fn new(message_type: i64, body: Bytes) -> Self {
        Self { message_type, body }
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Snapshot of the kernel's bookkeeping for one queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of messages currently queued
    pub message_count: u64,
    /// Maximum number of bytes the queue may hold
    pub max_bytes: u64,
    /// Process that sent the most recent message
    pub last_send_pid: Option<i32>,
    /// Process that received the most recent message
    pub last_receive_pid: Option<i32>,
    pub last_send_at: Option<DateTime<Utc>>,
    pub last_receive_at: Option<DateTime<Utc>>,
    pub changed_at: Option<DateTime<Utc>>,
}

fn parse_integer(text: &str, field: &str) -> Result<i64, ValidationError> {
    if text.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let (digits, radix, negative) = match text.strip_prefix('-') {
        Some(rest) => (rest, 10, true),
        None => match text
            .strip_prefix("0x")
            .or_else(|| text.strip_prefix("0X"))
        {
            Some(hex) => (hex, 16, false),
            None => match text.strip_prefix("0o") {
                Some(octal) => (octal, 8, false),
                None => (text, 10, false),
            },
        },
    };

    if digits.starts_with(['+', '-']) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            message: format!("'{}' has a misplaced sign", text),
        });
    }

    let value = i64::from_str_radix(digits, radix).map_err(|e| ValidationError::InvalidFormat {
        field: field.to_string(),
        message: format!("'{}' is not an integer: {}", text, e),
    })?;

    Ok(if negative { -value } else { value })
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
