//! In-memory queue primitive implementation for testing and development.
//!
//! This module emulates the kernel's System-V message queue semantics inside
//! the process:
//! - Key registry with `IPC_CREAT` / `IPC_EXCL` / `IPC_PRIVATE` handling
//! - Blocking send and receive, or `IPC_NOWAIT` failures
//! - Type selection (`0`, exact, lowest-below and `MSG_EXCEPT`)
//! - `E2BIG` for long messages unless `MSG_NOERROR` truncates them
//! - `EIDRM` for receivers blocked on a queue that gets removed
//!
//! Clones share the same registry, so two sessions opened through clones of
//! one provider see the same queues just like two processes would.

use crate::config::{InMemoryConfig, PrimitiveType};
use crate::error::{PrimitiveOperation, QueueError};
use crate::message::{
    CreationFlags, MessageType, QueueHandle, QueueKey, QueueStats, ReceivedMessage, TypeSelector,
    IPC_EXCL, IPC_NOWAIT, MSG_EXCEPT, MSG_NOERROR,
};
use crate::primitive::QueuePrimitive;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Key and id tables shared by every clone of the provider
#[derive(Default)]
struct Registry {
    by_key: HashMap<QueueKey, i32>,
    queues: HashMap<i32, Arc<MemoryQueue>>,
    next_id: i32,
}

impl Registry {
    fn create(&mut self, key: QueueKey) -> QueueHandle {
        let id = self.next_id;
        self.next_id += 1;

        self.queues.insert(id, Arc::new(MemoryQueue::new()));
        if key != QueueKey::PRIVATE {
            self.by_key.insert(key, id);
        }

        QueueHandle::new(id)
    }

    fn remove(&mut self, handle: QueueHandle) -> Option<Arc<MemoryQueue>> {
        let queue = self.queues.remove(&handle.id())?;
        self.by_key.retain(|_, id| *id != handle.id());
        Some(queue)
    }
}

/// One emulated queue
struct MemoryQueue {
    state: Mutex<QueueState>,
    /// Woken whenever a message is added or removed, or the queue goes away
    changed: Notify,
}

impl MemoryQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState::new()),
            changed: Notify::new(),
        }
    }
}

struct QueueState {
    messages: VecDeque<StoredMessage>,
    bytes: usize,
    removed: bool,
    last_send_pid: Option<i32>,
    last_receive_pid: Option<i32>,
    last_send_at: Option<DateTime<Utc>>,
    last_receive_at: Option<DateTime<Utc>>,
    changed_at: DateTime<Utc>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            bytes: 0,
            removed: false,
            last_send_pid: None,
            last_receive_pid: None,
            last_send_at: None,
            last_receive_at: None,
            changed_at: Utc::now(),
        }
    }
}

struct StoredMessage {
    message_type: i64,
    body: Bytes,
}

/// Outcome of one attempt at taking a message
enum Attempt<T> {
    Done(Result<T, QueueError>),
    Wait,
}

// ============================================================================
// InMemoryPrimitive
// ============================================================================

/// In-memory queue primitive implementation
#[derive(Clone)]
pub struct InMemoryPrimitive {
    registry: Arc<Mutex<Registry>>,
    config: InMemoryConfig,
}

impl InMemoryPrimitive {
    /// Create new in-memory primitive with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            config,
        }
    }

    /// Number of queues that currently exist
    pub async fn queue_count(&self) -> usize {
        self.registry.lock().await.queues.len()
    }

    async fn queue(
        &self,
        handle: QueueHandle,
        operation: PrimitiveOperation,
    ) -> Result<Arc<MemoryQueue>, QueueError> {
        self.registry
            .lock()
            .await
            .queues
            .get(&handle.id())
            .cloned()
            .ok_or_else(|| QueueError::from_errno(operation, libc::EINVAL))
    }

    fn try_send(
        &self,
        state: &mut QueueState,
        payload: &Bytes,
        message_type: MessageType,
        flags: i32,
    ) -> Attempt<()> {
        if state.removed {
            return Attempt::Done(Err(QueueError::from_errno(
                PrimitiveOperation::Send,
                libc::EIDRM,
            )));
        }

        if state.bytes + payload.len() > self.config.max_queue_bytes {
            if flags & IPC_NOWAIT != 0 {
                return Attempt::Done(Err(QueueError::from_errno(
                    PrimitiveOperation::Send,
                    libc::EAGAIN,
                )));
            }
            return Attempt::Wait;
        }

        state.bytes += payload.len();
        state.messages.push_back(StoredMessage {
            message_type: message_type.value(),
            body: payload.clone(),
        });
        state.last_send_pid = Some(std::process::id() as i32);
        state.last_send_at = Some(Utc::now());
        Attempt::Done(Ok(()))
    }

    fn try_receive(
        state: &mut QueueState,
        max_size: usize,
        message_type: i64,
        flags: i32,
    ) -> Attempt<ReceivedMessage> {
        if state.removed {
            return Attempt::Done(Err(QueueError::from_errno(
                PrimitiveOperation::Receive,
                libc::EIDRM,
            )));
        }

        let selector = TypeSelector::new(message_type);
        let types = state.messages.iter().map(|m| m.message_type);
        let Some(index) = selector.select(types, flags & MSG_EXCEPT != 0) else {
            if flags & IPC_NOWAIT != 0 {
                return Attempt::Done(Err(QueueError::from_errno(
                    PrimitiveOperation::Receive,
                    libc::ENOMSG,
                )));
            }
            return Attempt::Wait;
        };

        if state.messages[index].body.len() > max_size && flags & MSG_NOERROR == 0 {
            return Attempt::Done(Err(QueueError::from_errno(
                PrimitiveOperation::Receive,
                libc::E2BIG,
            )));
        }

        let Some(stored) = state.messages.remove(index) else {
            return Attempt::Wait;
        };
        state.bytes -= stored.body.len();
        state.last_receive_pid = Some(std::process::id() as i32);
        state.last_receive_at = Some(Utc::now());

        let mut body = stored.body;
        body.truncate(max_size);
        Attempt::Done(Ok(ReceivedMessage::new(stored.message_type, body)))
    }
}

impl Default for InMemoryPrimitive {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueuePrimitive for InMemoryPrimitive {
    async fn open_or_create(
        &self,
        key: QueueKey,
        flags: CreationFlags,
    ) -> Result<QueueHandle, QueueError> {
        let mut registry = self.registry.lock().await;

        if key == QueueKey::PRIVATE {
            return Ok(registry.create(key));
        }

        match registry.by_key.get(&key) {
            Some(_) if flags.creates() && flags.bits() & IPC_EXCL != 0 => {
                Err(QueueError::from_errno(PrimitiveOperation::Open, libc::EEXIST))
            }
            Some(id) => Ok(QueueHandle::new(*id)),
            None if flags.creates() => Ok(registry.create(key)),
            None => Err(QueueError::from_errno(PrimitiveOperation::Open, libc::ENOENT)),
        }
    }

    async fn send(
        &self,
        handle: QueueHandle,
        payload: Bytes,
        message_type: MessageType,
        flags: i32,
    ) -> Result<(), QueueError> {
        if payload.len() > self.config.max_message_size {
            return Err(QueueError::from_errno(PrimitiveOperation::Send, libc::EINVAL));
        }

        let queue = self.queue(handle, PrimitiveOperation::Send).await?;
        loop {
            let changed = queue.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = queue.state.lock().await;
                if let Attempt::Done(result) =
                    self.try_send(&mut state, &payload, message_type, flags)
                {
                    drop(state);
                    queue.changed.notify_waiters();
                    return result;
                }
            }

            changed.await;
        }
    }

    async fn receive(
        &self,
        handle: QueueHandle,
        max_size: usize,
        message_type: i64,
        flags: i32,
    ) -> Result<ReceivedMessage, QueueError> {
        let queue = self.queue(handle, PrimitiveOperation::Receive).await?;
        loop {
            let changed = queue.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            {
                let mut state = queue.state.lock().await;
                if let Attempt::Done(result) =
                    Self::try_receive(&mut state, max_size, message_type, flags)
                {
                    drop(state);
                    queue.changed.notify_waiters();
                    return result;
                }
            }

            changed.await;
        }
    }

    async fn close(&self, handle: QueueHandle) -> Result<bool, QueueError> {
        let queue = self
            .registry
            .lock()
            .await
            .remove(handle)
            .ok_or_else(|| QueueError::from_errno(PrimitiveOperation::Close, libc::EINVAL))?;

        queue.state.lock().await.removed = true;
        queue.changed.notify_waiters();
        Ok(true)
    }

    async fn stat(&self, handle: QueueHandle) -> Result<QueueStats, QueueError> {
        let queue = self.queue(handle, PrimitiveOperation::Stat).await?;
        let state = queue.state.lock().await;

        Ok(QueueStats {
            message_count: state.messages.len() as u64,
            max_bytes: self.config.max_queue_bytes as u64,
            last_send_pid: state.last_send_pid,
            last_receive_pid: state.last_receive_pid,
            last_send_at: state.last_send_at,
            last_receive_at: state.last_receive_at,
            changed_at: Some(state.changed_at),
        })
    }

    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::InMemory
    }
}
