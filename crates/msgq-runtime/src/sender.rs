//! Sending typed messages.

use crate::error::QueueError;
use crate::message::SendOptions;
use crate::session::MessageQueue;
use bytes::Bytes;
use tracing::debug;

impl MessageQueue {
    /// Send one message
    ///
    /// The type defaults to 1 and must be positive; an invalid type is
    /// rejected before the primitive is called. Flags are passed through, so
    /// without `IPC_NOWAIT` a full queue blocks the caller.
    pub async fn send(
        &self,
        payload: impl Into<Bytes>,
        options: SendOptions,
    ) -> Result<(), QueueError> {
        let payload = payload.into();
        let message_type = options.resolved_type()?;
        let handle = self
            .shared
            .state
            .lock()
            .await
            .open_handle(self.shared.key)?;

        debug!(
            key = %self.shared.key,
            message_type = %message_type,
            bytes = payload.len(),
            "Sending message"
        );

        self.shared
            .primitive
            .send(handle, payload, message_type, options.flags)
            .await
    }
}
