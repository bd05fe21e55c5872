//! Common test utilities for msgq integration tests
//!
//! This module provides:
//! - Sessions on freshly created kernel queues
//! - Sessions sharing one in-memory primitive, standing in for two processes
//! - Timeout-guarded helpers for subscriptions and polling

use msgq_runtime::{
    InMemoryPrimitive, MessageQueue, QueuePrimitive, ReceivedMessage, SessionOptions, Subscription,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(2);

/// Open `key` on the kernel after removing whatever an earlier run left behind
#[cfg(target_os = "linux")]
#[allow(dead_code)]
pub async fn fresh_kernel_queue(key: i32) -> anyhow::Result<MessageQueue> {
    let stale = MessageQueue::open(key, None).await?;
    stale.close().await?;
    Ok(MessageQueue::open(key, None).await?)
}

/// Two sessions on the same key, as a producer and a consumer process would hold
#[allow(dead_code)]
pub async fn in_memory_pair(key: i32) -> anyhow::Result<(MessageQueue, MessageQueue)> {
    in_memory_pair_with(key, SessionOptions::default()).await
}

#[allow(dead_code)]
pub async fn in_memory_pair_with(
    key: i32,
    options: SessionOptions,
) -> anyhow::Result<(MessageQueue, MessageQueue)> {
    let primitive = InMemoryPrimitive::default();
    let producer_side: Arc<dyn QueuePrimitive> = Arc::new(primitive.clone());
    let consumer_side: Arc<dyn QueuePrimitive> = Arc::new(primitive);

    let producer =
        MessageQueue::open_with(key, None, producer_side, SessionOptions::default()).await?;
    let consumer = MessageQueue::open_with(key, None, consumer_side, options).await?;
    Ok((producer, consumer))
}

/// Next delivered message, failing the test after [`WAIT`]
#[allow(dead_code)]
pub async fn next_message(subscription: &mut Subscription) -> ReceivedMessage {
    tokio::time::timeout(WAIT, subscription.recv())
        .await
        .expect("message should be delivered in time")
        .expect("subscription should still be open")
}

/// Wait on `subscription` briefly and give up, so the session's loop is left
/// parked in a receive
#[allow(dead_code)]
pub async fn abandon_recv(subscription: &mut Subscription) {
    let waited = tokio::time::timeout(Duration::from_millis(50), subscription.recv()).await;
    assert!(waited.is_err(), "nothing should have been delivered yet");
}

/// Poll `condition` until it holds or [`WAIT`] has passed
#[allow(dead_code)]
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
