//! Selective pull receives.
//!
//! A pull first looks in the pending cache and only then asks the primitive.
//! Primitive receives are serialized through the session's receive gate, so
//! a pull never overlaps with the consumer loop's own receive.

use crate::error::{PrimitiveOperation, QueueError};
use crate::message::{QueueHandle, ReceiveOptions, ReceivedMessage, IPC_NOWAIT, MAX_MESSAGE_SIZE};
use crate::session::{MessageQueue, SessionShared, SessionState};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::debug;

#[cfg(test)]
#[path = "receiver_tests.rs"]
mod tests;

/// What a pull found before it had to wait on the primitive
enum Checkout {
    Cached(ReceivedMessage),
    Primitive(QueueHandle),
}

impl SessionState {
    /// Pull receives are refused while the session is closed or subscribed
    fn ensure_pull_allowed(&mut self, shared: &SessionShared) -> Result<(), QueueError> {
        let key = shared.key;
        if self.is_closed() {
            return Err(QueueError::SessionClosed { key: key.value() });
        }

        let subscribers = self.live_subscribers(shared);
        if subscribers > 0 {
            return Err(QueueError::UsageConflict {
                message: format!(
                    "cannot pull from queue {key} while {subscribers} subscriber(s) are registered"
                ),
            });
        }

        Ok(())
    }
}

impl SessionShared {
    /// Take a matching cached message, or the handle for a primitive receive
    async fn checkout(&self, options: &ReceiveOptions) -> Result<Checkout, QueueError> {
        let mut state = self.state.lock().await;
        state.ensure_pull_allowed(self)?;

        if let Some(message) = state.pending.take(options.selector, self.options.cache_lookup) {
            debug!(
                key = %self.key,
                message_type = message.message_type,
                remaining = state.pending.len(),
                "Served message from pending cache"
            );
            return Ok(Checkout::Cached(message));
        }

        Ok(Checkout::Primitive(state.open_handle(self.key)?))
    }
}

impl MessageQueue {
    /// Receive one message matching `options`
    ///
    /// Fails with a usage conflict while any subscriber is registered. With
    /// default flags the call waits until a matching message arrives. With
    /// `IPC_NOWAIT` it also refuses to wait behind another outstanding
    /// receive and reports no message instead.
    ///
    /// Cancelling the returned future does not cancel the primitive receive.
    /// It keeps the session's receive slot until it completes, and a message
    /// it takes lands in the pending cache.
    pub async fn pop(&self, options: ReceiveOptions) -> Result<ReceivedMessage, QueueError> {
        let shared = &self.shared;

        // Cache hits don't wait behind an outstanding receive.
        if let Checkout::Cached(message) = shared.checkout(&options).await? {
            return Ok(message);
        }

        let gate = if options.flags & IPC_NOWAIT != 0 {
            match Arc::clone(&shared.receive_gate).try_lock_owned() {
                Ok(gate) => gate,
                Err(_) => {
                    debug!(key = %shared.key, "Receive already outstanding; not waiting");
                    return Err(QueueError::from_errno(
                        PrimitiveOperation::Receive,
                        libc::ENOMSG,
                    ));
                }
            }
        } else {
            Arc::clone(&shared.receive_gate).lock_owned().await
        };

        let handle = match shared.checkout(&options).await? {
            Checkout::Cached(message) => return Ok(message),
            Checkout::Primitive(handle) => handle,
        };

        debug!(
            key = %shared.key,
            selector = options.selector.value(),
            flags = options.flags,
            "Receiving message"
        );

        let (reply, outcome) = oneshot::channel();
        let task_shared = Arc::clone(shared);
        tokio::spawn(async move {
            let _gate = gate;
            let result = task_shared
                .primitive
                .receive(handle, MAX_MESSAGE_SIZE, options.selector.value(), options.flags)
                .await;

            if let Err(Ok(message)) = reply.send(result) {
                let mut state = task_shared.state.lock().await;
                debug!(
                    key = %task_shared.key,
                    message_type = message.message_type,
                    "Pull abandoned; cached its message"
                );
                state.pending.restore(message);
            }
        });

        outcome.await.map_err(|e| QueueError::TaskFailed {
            message: format!("{} task did not complete: {}", PrimitiveOperation::Receive, e),
        })?
    }
}
