//! Interface to the underlying message queue primitive.
//!
//! The session engine never talks to the kernel directly; it drives an
//! implementation of [`QueuePrimitive`]. Errors are reported as
//! [`QueueError::Collaborator`] carrying the OS error number, and send and
//! receive follow the blocking rules of the flags they are given.

use crate::config::PrimitiveType;
use crate::error::QueueError;
use crate::message::{CreationFlags, MessageType, QueueHandle, QueueKey, QueueStats, ReceivedMessage};
use async_trait::async_trait;
use bytes::Bytes;

/// Interface implemented by specific queue primitives (kernel, in-memory)
#[async_trait]
pub trait QueuePrimitive: Send + Sync {
    /// Open the queue for `key`, creating it when `flags` request it
    async fn open_or_create(
        &self,
        key: QueueKey,
        flags: CreationFlags,
    ) -> Result<QueueHandle, QueueError>;

    /// Append one message to the queue
    async fn send(
        &self,
        handle: QueueHandle,
        payload: Bytes,
        message_type: MessageType,
        flags: i32,
    ) -> Result<(), QueueError>;

    /// Take one message matching `message_type` off the queue
    ///
    /// Messages longer than `max_size` are rejected unless the flags ask for
    /// truncation.
    async fn receive(
        &self,
        handle: QueueHandle,
        max_size: usize,
        message_type: i64,
        flags: i32,
    ) -> Result<ReceivedMessage, QueueError>;

    /// Remove the queue
    async fn close(&self, handle: QueueHandle) -> Result<bool, QueueError>;

    /// Read the queue's bookkeeping
    async fn stat(&self, handle: QueueHandle) -> Result<QueueStats, QueueError>;

    /// Get primitive type
    fn primitive_type(&self) -> PrimitiveType;
}
