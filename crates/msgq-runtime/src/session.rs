//! Queue session lifecycle.
//!
//! A [`MessageQueue`] owns one open handle on one queue. Clones share the
//! session: they see the same handle, cache, subscribers and closed state.
//!
//! Sending lives in `sender`, pull receives in `receiver` and the
//! subscription loop in `consumer`; all of them go through the
//! [`SessionShared`] defined here.

use crate::config::{PrimitiveConfig, PrimitiveType, QueueConfig, SessionOptions};
use crate::consumer::{ConsumerState, Delivery, Subscribers};
use crate::error::{ConfigurationError, QueueError};
use crate::message::{CreationFlags, Permissions, QueueHandle, QueueKey, QueueStats};
use crate::pending::PendingMessages;
use crate::primitive::QueuePrimitive;
use crate::primitives::InMemoryPrimitive;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;

/// Capacity of the session error broadcast
const ERROR_CHANNEL_CAPACITY: usize = 16;

/// Client session on one typed message queue
///
/// # Examples
///
/// ```
/// use msgq_runtime::{InMemoryPrimitive, MessageQueue, ReceiveOptions, SendOptions, SessionOptions};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let primitive = Arc::new(InMemoryPrimitive::default());
/// let queue = MessageQueue::open_with(31337, None, primitive, SessionOptions::default()).await?;
///
/// queue.send("test", SendOptions::new().with_type(3)).await?;
/// let message = queue.pop(ReceiveOptions::new().with_type(3)).await?;
/// assert_eq!(&message.body[..], b"test");
///
/// queue.close().await?;
/// # Ok::<(), msgq_runtime::QueueError>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct MessageQueue {
    pub(crate) shared: Arc<SessionShared>,
}

/// State shared by every clone of a session and by its consumer loop
pub(crate) struct SessionShared {
    pub(crate) key: QueueKey,
    pub(crate) permissions: Permissions,
    pub(crate) options: SessionOptions,
    pub(crate) primitive: Arc<dyn QueuePrimitive>,
    pub(crate) state: Mutex<SessionState>,
    /// Held for the duration of every primitive receive
    pub(crate) receive_gate: Arc<Mutex<()>>,
    pub(crate) errors: broadcast::Sender<Arc<QueueError>>,
    /// Subscription receives currently waiting for a message
    pub(crate) waiting_receivers: AtomicUsize,
    /// Wakes the consumer loop when subscribers read, leave or the session closes
    pub(crate) demand: Notify,
}

/// Mutable session state; never held across a primitive receive
pub(crate) struct SessionState {
    handle: Option<QueueHandle>,
    closed: bool,
    pub(crate) pending: PendingMessages,
    pub(crate) subscribers: Subscribers,
    pub(crate) consumer: ConsumerState,
    pub(crate) last_error: Option<Arc<QueueError>>,
    /// Most recent fan-out, until a subscriber reads it
    pub(crate) in_flight: Option<Arc<Delivery>>,
}

impl SessionState {
    fn new(options: &SessionOptions) -> Self {
        Self {
            handle: None,
            closed: false,
            pending: PendingMessages::new(options.pending.clone()),
            subscribers: Subscribers::default(),
            consumer: ConsumerState::Idle,
            last_error: None,
            in_flight: None,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Handle of the open queue, or `SessionClosed`
    pub(crate) fn open_handle(&self, key: QueueKey) -> Result<QueueHandle, QueueError> {
        match self.handle {
            Some(handle) if !self.closed => Ok(handle),
            _ => Err(QueueError::SessionClosed { key: key.value() }),
        }
    }
}

impl SessionShared {
    /// Open the queue and remember its handle
    pub(crate) async fn attach(&self) -> Result<QueueHandle, QueueError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.handle {
            return Err(QueueError::AlreadyOpen {
                handle: existing.id(),
            });
        }
        if state.closed {
            return Err(QueueError::SessionClosed {
                key: self.key.value(),
            });
        }

        let handle = self
            .primitive
            .open_or_create(self.key, self.permissions.creation_flags())
            .await?;

        state.handle = Some(handle);
        state.closed = false;
        info!(
            key = %self.key,
            handle = %handle,
            primitive = ?self.primitive.primitive_type(),
            "Opened message queue"
        );
        Ok(handle)
    }
}

impl MessageQueue {
    /// Open or create the kernel queue for `key`
    ///
    /// `permissions` defaults to `0x666`.
    pub async fn open(
        key: impl Into<QueueKey>,
        permissions: Option<Permissions>,
    ) -> Result<Self, QueueError> {
        let primitive = kernel_primitive()?;
        Self::open_with(key, permissions, primitive, SessionOptions::default()).await
    }

    /// Open or create a queue through an explicit primitive
    pub async fn open_with(
        key: impl Into<QueueKey>,
        permissions: Option<Permissions>,
        primitive: Arc<dyn QueuePrimitive>,
        options: SessionOptions,
    ) -> Result<Self, QueueError> {
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let shared = Arc::new(SessionShared {
            key: key.into(),
            permissions: permissions.unwrap_or_default(),
            state: Mutex::new(SessionState::new(&options)),
            options,
            primitive,
            receive_gate: Arc::new(Mutex::new(())),
            errors,
            waiting_receivers: AtomicUsize::new(0),
            demand: Notify::new(),
        });

        shared.attach().await?;
        Ok(Self { shared })
    }

    /// Open a queue described by configuration
    pub async fn from_config(config: QueueConfig) -> Result<Self, QueueError> {
        config.validate()?;
        let key = config.key.ok_or_else(|| ConfigurationError::Missing {
            key: "key".to_string(),
        })?;

        let primitive: Arc<dyn QueuePrimitive> = match config.primitive {
            PrimitiveConfig::Kernel => kernel_primitive()?,
            PrimitiveConfig::InMemory(memory_config) => {
                Arc::new(InMemoryPrimitive::new(memory_config))
            }
        };

        Self::open_with(
            key,
            Some(Permissions::new(config.permissions)),
            primitive,
            config.session,
        )
        .await
    }

    pub fn key(&self) -> QueueKey {
        self.shared.key
    }

    pub fn permissions(&self) -> Permissions {
        self.shared.permissions
    }

    pub fn creation_flags(&self) -> CreationFlags {
        self.shared.permissions.creation_flags()
    }

    pub fn primitive_type(&self) -> PrimitiveType {
        self.shared.primitive.primitive_type()
    }

    /// Handle of the open queue; `None` once closed
    pub async fn handle(&self) -> Option<QueueHandle> {
        let state = self.shared.state.lock().await;
        state.open_handle(self.shared.key).ok()
    }

    pub async fn is_closed(&self) -> bool {
        self.shared.state.lock().await.is_closed()
    }

    /// Number of messages waiting in the pending cache
    pub async fn pending_len(&self) -> usize {
        self.shared.state.lock().await.pending.len()
    }

    /// Read the queue's bookkeeping from the primitive
    pub async fn stat(&self) -> Result<QueueStats, QueueError> {
        let handle = self
            .shared
            .state
            .lock()
            .await
            .open_handle(self.shared.key)?;
        self.shared.primitive.stat(handle).await
    }

    /// Close the session and remove the queue
    ///
    /// Closing an already closed session succeeds without touching the
    /// primitive. When the primitive fails the session stays open and the
    /// close can be retried.
    pub async fn close(&self) -> Result<(), QueueError> {
        let key = self.shared.key;
        let mut state = self.shared.state.lock().await;
        if state.closed {
            debug!(key = %key, "Queue already closed");
            return Ok(());
        }

        let Some(handle) = state.handle else {
            state.closed = true;
            return Ok(());
        };

        if let Err(err) = self.shared.primitive.close(handle).await {
            warn!(key = %key, handle = %handle, error = %err, "Failed to close queue");
            return Err(err);
        }

        state.closed = true;
        state.handle = None;
        state.subscribers.clear();
        if state.consumer == ConsumerState::Active {
            state.consumer = ConsumerState::DrainingToClose;
        }
        self.shared.demand.notify_one();

        info!(
            key = %key,
            handle = %handle,
            undelivered = state.pending.len(),
            "Closed message queue"
        );
        Ok(())
    }
}

impl std::fmt::Debug for SessionShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionShared")
            .field("key", &self.key)
            .field("permissions", &self.permissions)
            .field("primitive", &self.primitive.primitive_type())
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for MessageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageQueue")
            .field("shared", &self.shared)
            .finish()
    }
}

#[cfg(target_os = "linux")]
fn kernel_primitive() -> Result<Arc<dyn QueuePrimitive>, QueueError> {
    Ok(Arc::new(crate::primitives::SysVPrimitive::new()))
}

#[cfg(not(target_os = "linux"))]
fn kernel_primitive() -> Result<Arc<dyn QueuePrimitive>, QueueError> {
    Err(ConfigurationError::UnsupportedPrimitive {
        primitive: "SysV".to_string(),
        message: "kernel message queues are only supported on Linux".to_string(),
    }
    .into())
}
