//! Error types for queue session operations.

use std::fmt;
use std::io;
use thiserror::Error;

/// Comprehensive error type for all queue session operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(#[from] ValidationError),

    #[error("Queue already open with handle {handle}")]
    AlreadyOpen { handle: i32 },

    #[error("Usage conflict: {message}")]
    UsageConflict { message: String },

    #[error("Failed to {operation}: {source}")]
    Collaborator {
        operation: PrimitiveOperation,
        #[source]
        source: io::Error,
    },

    #[error("Queue session for key {key} is closed")]
    SessionClosed { key: i32 },

    #[error("Background task failed: {message}")]
    TaskFailed { message: String },

    #[error("Configuration error: {0}")]
    ConfigurationError(#[from] ConfigurationError),
}

impl QueueError {
    /// Build a collaborator error from a raw OS error number
    pub fn from_errno(operation: PrimitiveOperation, errno: i32) -> Self {
        Self::Collaborator {
            operation,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// Build a collaborator error from the calling thread's last OS error
    pub fn last_os_error(operation: PrimitiveOperation) -> Self {
        Self::Collaborator {
            operation,
            source: io::Error::last_os_error(),
        }
    }

    /// OS error number reported by the primitive, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Collaborator { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// True when a non-blocking receive found no matching message
    pub fn is_no_message(&self) -> bool {
        self.errno() == Some(libc::ENOMSG)
    }

    /// True when the queue was removed underneath the operation
    pub fn is_removed(&self) -> bool {
        self.errno() == Some(libc::EIDRM)
    }

    /// Check if error is transient and the caller may retry
    ///
    /// The session never retries on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Collaborator { .. } => matches!(
                self.errno(),
                Some(libc::EINTR) | Some(libc::EAGAIN) | Some(libc::ENOMSG)
            ),
            Self::UsageConflict { .. } => true,
            Self::InvalidArgument(_) => false,
            Self::AlreadyOpen { .. } => false,
            Self::SessionClosed { .. } => false,
            Self::TaskFailed { .. } => false,
            Self::ConfigurationError(_) => false,
        }
    }
}

/// Primitive call that produced a collaborator error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveOperation {
    Open,
    Send,
    Receive,
    Close,
    Stat,
}

impl fmt::Display for PrimitiveOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Open => "get queue",
            Self::Send => "send message",
            Self::Receive => "receive message",
            Self::Close => "close queue",
            Self::Stat => "read queue status",
        };
        f.write_str(text)
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Primitive '{primitive}' is not available: {message}")]
    UnsupportedPrimitive { primitive: String, message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
