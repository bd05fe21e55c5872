//! Shared helpers for session tests.

use crate::config::{PrimitiveType, SessionOptions};
use crate::consumer::Subscription;
use crate::error::{PrimitiveOperation, QueueError};
use crate::message::{
    CreationFlags, MessageType, Permissions, QueueHandle, QueueKey, QueueStats, ReceivedMessage,
};
use crate::primitive::QueuePrimitive;
use crate::primitives::InMemoryPrimitive;
use crate::session::MessageQueue;
use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Scripted Primitive
// ============================================================================

#[derive(Default)]
struct Script {
    open_calls: usize,
    send_calls: usize,
    receive_calls: usize,
    close_calls: usize,
    in_flight_receives: usize,
    max_in_flight_receives: usize,
    fail_next_open: Option<i32>,
    fail_next_receive: Option<i32>,
    fail_next_close: Option<i32>,
}

/// In-memory primitive that counts calls and fails on request
#[derive(Clone, Default)]
pub(crate) struct ScriptedPrimitive {
    inner: InMemoryPrimitive,
    script: Arc<Mutex<Script>>,
}

impl ScriptedPrimitive {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open_calls(&self) -> usize {
        self.script.lock().unwrap().open_calls
    }

    pub(crate) fn send_calls(&self) -> usize {
        self.script.lock().unwrap().send_calls
    }

    pub(crate) fn receive_calls(&self) -> usize {
        self.script.lock().unwrap().receive_calls
    }

    pub(crate) fn close_calls(&self) -> usize {
        self.script.lock().unwrap().close_calls
    }

    pub(crate) fn max_in_flight_receives(&self) -> usize {
        self.script.lock().unwrap().max_in_flight_receives
    }

    pub(crate) fn fail_next_open(&self, errno: i32) {
        self.script.lock().unwrap().fail_next_open = Some(errno);
    }

    pub(crate) fn fail_next_receive(&self, errno: i32) {
        self.script.lock().unwrap().fail_next_receive = Some(errno);
    }

    pub(crate) fn fail_next_close(&self, errno: i32) {
        self.script.lock().unwrap().fail_next_close = Some(errno);
    }
}

#[async_trait]
impl QueuePrimitive for ScriptedPrimitive {
    async fn open_or_create(
        &self,
        key: QueueKey,
        flags: CreationFlags,
    ) -> Result<QueueHandle, QueueError> {
        {
            let mut script = self.script.lock().unwrap();
            script.open_calls += 1;
            if let Some(errno) = script.fail_next_open.take() {
                return Err(QueueError::from_errno(PrimitiveOperation::Open, errno));
            }
        }
        self.inner.open_or_create(key, flags).await
    }

    async fn send(
        &self,
        handle: QueueHandle,
        payload: Bytes,
        message_type: MessageType,
        flags: i32,
    ) -> Result<(), QueueError> {
        self.script.lock().unwrap().send_calls += 1;
        self.inner.send(handle, payload, message_type, flags).await
    }

    async fn receive(
        &self,
        handle: QueueHandle,
        max_size: usize,
        message_type: i64,
        flags: i32,
    ) -> Result<ReceivedMessage, QueueError> {
        {
            let mut script = self.script.lock().unwrap();
            script.receive_calls += 1;
            if let Some(errno) = script.fail_next_receive.take() {
                return Err(QueueError::from_errno(PrimitiveOperation::Receive, errno));
            }
            script.in_flight_receives += 1;
            script.max_in_flight_receives = script
                .max_in_flight_receives
                .max(script.in_flight_receives);
        }

        let result = self
            .inner
            .receive(handle, max_size, message_type, flags)
            .await;
        self.script.lock().unwrap().in_flight_receives -= 1;
        result
    }

    async fn close(&self, handle: QueueHandle) -> Result<bool, QueueError> {
        {
            let mut script = self.script.lock().unwrap();
            script.close_calls += 1;
            if let Some(errno) = script.fail_next_close.take() {
                return Err(QueueError::from_errno(PrimitiveOperation::Close, errno));
            }
        }
        self.inner.close(handle).await
    }

    async fn stat(&self, handle: QueueHandle) -> Result<QueueStats, QueueError> {
        self.inner.stat(handle).await
    }

    fn primitive_type(&self) -> PrimitiveType {
        self.inner.primitive_type()
    }
}

// ============================================================================
// Session Helpers
// ============================================================================

/// Open a session on `key` through `primitive` with default options
pub(crate) async fn open_session(primitive: &ScriptedPrimitive, key: i32) -> MessageQueue {
    open_session_with(primitive, key, SessionOptions::default()).await
}

pub(crate) async fn open_session_with(
    primitive: &ScriptedPrimitive,
    key: i32,
    options: SessionOptions,
) -> MessageQueue {
    MessageQueue::open_with(
        key,
        Some(Permissions::default()),
        Arc::new(primitive.clone()),
        options,
    )
    .await
    .expect("session should open")
}

/// Poll `condition` until it holds or a second has passed
pub(crate) async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition().await
}

/// Give spawned tasks a chance to run
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Wait on `subscription` briefly and give up, leaving the loop's receive
/// outstanding on the primitive
pub(crate) async fn abandon_recv(subscription: &mut Subscription) {
    let waited = tokio::time::timeout(Duration::from_millis(30), subscription.recv()).await;
    assert!(waited.is_err(), "nothing should have been delivered yet");
}
