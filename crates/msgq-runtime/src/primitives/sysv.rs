//! Kernel System-V message queue primitive.
//!
//! `msgget` and `msgctl` never block and are called inline. `msgsnd` and
//! `msgrcv` may block until space or a matching message is available, so they
//! run on the blocking thread pool and only suspend the awaiting task.

use crate::config::PrimitiveType;
use crate::error::{PrimitiveOperation, QueueError};
use crate::message::{
    CreationFlags, MessageType, QueueHandle, QueueKey, QueueStats, ReceivedMessage,
};
use crate::primitive::QueuePrimitive;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::mem;
use tracing::debug;

#[cfg(test)]
#[path = "sysv_tests.rs"]
mod tests;

const HEADER_SIZE: usize = mem::size_of::<libc::c_long>();

/// Kernel message queue primitive
#[derive(Debug, Clone, Copy, Default)]
pub struct SysVPrimitive;

impl SysVPrimitive {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl QueuePrimitive for SysVPrimitive {
    async fn open_or_create(
        &self,
        key: QueueKey,
        flags: CreationFlags,
    ) -> Result<QueueHandle, QueueError> {
        // SAFETY: msgget only reads its two integer arguments.
        let id = unsafe { libc::msgget(key.value() as libc::key_t, flags.bits()) };
        if id == -1 {
            return Err(QueueError::last_os_error(PrimitiveOperation::Open));
        }

        debug!(key = %key, handle = id, "Opened kernel message queue");
        Ok(QueueHandle::new(id))
    }

    async fn send(
        &self,
        handle: QueueHandle,
        payload: Bytes,
        message_type: MessageType,
        flags: i32,
    ) -> Result<(), QueueError> {
        let id = handle.id();
        run_blocking(PrimitiveOperation::Send, move || {
            send_blocking(id, &payload, message_type.value(), flags)
        })
        .await
    }

    async fn receive(
        &self,
        handle: QueueHandle,
        max_size: usize,
        message_type: i64,
        flags: i32,
    ) -> Result<ReceivedMessage, QueueError> {
        let id = handle.id();
        run_blocking(PrimitiveOperation::Receive, move || {
            receive_blocking(id, max_size, message_type, flags)
        })
        .await
    }

    async fn close(&self, handle: QueueHandle) -> Result<bool, QueueError> {
        // SAFETY: IPC_RMID ignores the buffer argument.
        let ret = unsafe { libc::msgctl(handle.id(), libc::IPC_RMID, std::ptr::null_mut()) };
        if ret == -1 {
            return Err(QueueError::last_os_error(PrimitiveOperation::Close));
        }

        debug!(handle = %handle, "Removed kernel message queue");
        Ok(true)
    }

    async fn stat(&self, handle: QueueHandle) -> Result<QueueStats, QueueError> {
        // SAFETY: msqid_ds is plain old data; an all-zero value is valid.
        let mut ds: libc::msqid_ds = unsafe { mem::zeroed() };
        // SAFETY: ds is a live, writable msqid_ds for the duration of the call.
        let ret = unsafe { libc::msgctl(handle.id(), libc::IPC_STAT, &mut ds) };
        if ret == -1 {
            return Err(QueueError::last_os_error(PrimitiveOperation::Stat));
        }

        Ok(QueueStats {
            message_count: ds.msg_qnum as u64,
            max_bytes: ds.msg_qbytes as u64,
            last_send_pid: nonzero_pid(ds.msg_lspid),
            last_receive_pid: nonzero_pid(ds.msg_lrpid),
            last_send_at: epoch_seconds(ds.msg_stime as i64),
            last_receive_at: epoch_seconds(ds.msg_rtime as i64),
            changed_at: epoch_seconds(ds.msg_ctime as i64),
        })
    }

    fn primitive_type(&self) -> PrimitiveType {
        PrimitiveType::SysV
    }
}

/// Run a potentially blocking queue call on the blocking thread pool
async fn run_blocking<T, F>(operation: PrimitiveOperation, call: F) -> Result<T, QueueError>
where
    F: FnOnce() -> Result<T, QueueError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .map_err(|e| QueueError::TaskFailed {
            message: format!("{} task did not complete: {}", operation, e),
        })?
}

fn send_blocking(id: i32, payload: &[u8], message_type: i64, flags: i32) -> Result<(), QueueError> {
    let buffer = MessageBuffer::for_message(message_type, payload);

    // SAFETY: the buffer holds the type header followed by payload.len() bytes.
    let ret = unsafe { libc::msgsnd(id, buffer.as_ptr(), payload.len(), flags) };
    if ret == -1 {
        return Err(QueueError::last_os_error(PrimitiveOperation::Send));
    }

    Ok(())
}

fn receive_blocking(
    id: i32,
    max_size: usize,
    message_type: i64,
    flags: i32,
) -> Result<ReceivedMessage, QueueError> {
    let mut buffer = MessageBuffer::with_capacity(max_size);

    // SAFETY: the buffer has room for the type header plus max_size bytes.
    let received = unsafe {
        libc::msgrcv(
            id,
            buffer.as_mut_ptr(),
            max_size,
            message_type as libc::c_long,
            flags,
        )
    };
    if received < 0 {
        return Err(QueueError::last_os_error(PrimitiveOperation::Receive));
    }

    let length = received as usize;
    Ok(ReceivedMessage::new(
        buffer.message_type(),
        Bytes::copy_from_slice(&buffer.payload()[..length]),
    ))
}

/// Word-aligned `struct msgbuf`: a `long` type followed by the payload bytes
struct MessageBuffer {
    words: Vec<libc::c_long>,
}

impl MessageBuffer {
    fn with_capacity(capacity: usize) -> Self {
        let words = 1 + capacity.div_ceil(HEADER_SIZE);
        Self {
            words: vec![0; words],
        }
    }

    fn for_message(message_type: i64, payload: &[u8]) -> Self {
        let mut buffer = Self::with_capacity(payload.len());
        buffer.words[0] = message_type as libc::c_long;
        buffer.payload_mut()[..payload.len()].copy_from_slice(payload);
        buffer
    }

    fn message_type(&self) -> i64 {
        self.words[0] as i64
    }

    fn byte_len(&self) -> usize {
        self.words.len() * HEADER_SIZE
    }

    fn payload(&self) -> &[u8] {
        // SAFETY: the words are initialised and any byte pattern is a valid u8.
        let bytes = unsafe {
            std::slice::from_raw_parts(self.words.as_ptr().cast::<u8>(), self.byte_len())
        };
        &bytes[HEADER_SIZE..]
    }

    fn payload_mut(&mut self) -> &mut [u8] {
        let len = self.byte_len();
        // SAFETY: as above, and the mutable borrow of self keeps the view unique.
        let bytes =
            unsafe { std::slice::from_raw_parts_mut(self.words.as_mut_ptr().cast::<u8>(), len) };
        &mut bytes[HEADER_SIZE..]
    }

    fn as_ptr(&self) -> *const libc::c_void {
        self.words.as_ptr().cast()
    }

    fn as_mut_ptr(&mut self) -> *mut libc::c_void {
        self.words.as_mut_ptr().cast()
    }
}

fn nonzero_pid(pid: libc::pid_t) -> Option<i32> {
    (pid != 0).then_some(pid as i32)
}

fn epoch_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    DateTime::from_timestamp(seconds, 0)
}
