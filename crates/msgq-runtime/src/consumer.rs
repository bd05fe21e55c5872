//! Continuous consumption.
//!
//! Subscribing starts a background loop on the session, unless one is
//! already running. The loop receives messages of any type, serving the
//! pending cache first, and hands each message to every live subscriber.
//! A message nobody is subscribed for when it arrives goes to the pending
//! cache.
//!
//! The loop is driven by demand. It only asks for the next message while a
//! subscriber is waiting in [`Subscription::recv`] and every subscriber has
//! read the previous one, so messages stay on the queue until somebody wants
//! them. A subscriber that stops reading holds back the others. If the last
//! subscriber leaves before anyone read a delivered message, that message
//! goes back to the head of the pending cache.
//!
//! Before each receive the loop checks whether it should keep going. It
//! stops on its own once the session is closed, the last subscriber is gone
//! or a `StopLoop` cache has filled up. A receive failure stops it too; the
//! failure is logged once, kept as the session's last error and broadcast to
//! [`MessageQueue::errors`] listeners.

use crate::error::QueueError;
use crate::message::{QueueHandle, ReceivedMessage, TypeSelector, MAX_MESSAGE_SIZE};
use crate::pending::PushOutcome;
use crate::session::{MessageQueue, SessionShared, SessionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Lifecycle of the consumer loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    /// No loop is running
    Idle,
    /// A loop is running and will issue further receives
    Active,
    /// The session was closed while the loop ran; its last receive is
    /// still being settled
    DrainingToClose,
}

// ============================================================================
// Subscribers
// ============================================================================

/// One message fanned out to the subscribers
#[derive(Debug)]
pub(crate) struct Delivery {
    message: ReceivedMessage,
    claimed: AtomicBool,
}

impl Delivery {
    fn new(message: ReceivedMessage) -> Self {
        Self {
            message,
            claimed: AtomicBool::new(false),
        }
    }

    fn claim(&self) -> ReceivedMessage {
        self.claimed.store(true, Ordering::SeqCst);
        self.message.clone()
    }

    fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::SeqCst)
    }
}

/// Registered subscription channels; each holds at most one unread delivery
#[derive(Debug, Default)]
pub(crate) struct Subscribers {
    senders: Vec<(u64, mpsc::Sender<Arc<Delivery>>)>,
    next_id: u64,
}

impl Subscribers {
    fn register(&mut self) -> (u64, mpsc::Receiver<Arc<Delivery>>) {
        let (sender, receiver) = mpsc::channel(1);
        let id = self.next_id;
        self.next_id += 1;
        self.senders.push((id, sender));
        (id, receiver)
    }

    fn remove(&mut self, id: u64) {
        self.senders.retain(|(existing, _)| *existing != id);
    }

    /// Drop subscribers whose receiving side is gone and count the rest
    fn prune(&mut self) -> usize {
        self.senders.retain(|(_, sender)| !sender.is_closed());
        self.senders.len()
    }

    /// True when no subscriber has an unread delivery
    fn all_read(&self) -> bool {
        self.senders
            .iter()
            .all(|(_, sender)| sender.capacity() == sender.max_capacity())
    }

    /// Hand `delivery` to every live subscriber
    fn deliver(&mut self, delivery: &Arc<Delivery>) -> usize {
        let mut delivered = 0;
        self.senders
            .retain(|(_, sender)| match sender.try_send(Arc::clone(delivery)) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => true,
                Err(TrySendError::Closed(_)) => false,
            });
        delivered
    }

    pub(crate) fn clear(&mut self) {
        self.senders.clear();
    }
}

impl SessionState {
    /// Count live subscribers
    ///
    /// Once none are left, a delivery nobody read goes back to the head of
    /// the pending cache.
    pub(crate) fn live_subscribers(&mut self, shared: &SessionShared) -> usize {
        let live = self.subscribers.prune();
        if live > 0 || self.is_closed() {
            return live;
        }

        if let Some(delivery) = self.in_flight.take() {
            if !delivery.is_claimed() {
                debug!(
                    key = %shared.key,
                    message_type = delivery.message.message_type,
                    "Returned unread message to pending cache"
                );
                self.pending.restore(delivery.message.clone());
            }
        }
        0
    }

    /// True when the loop may fetch another message, or has to stop
    fn ready_for_delivery(&mut self, shared: &SessionShared) -> bool {
        if self.is_closed() || self.live_subscribers(shared) == 0 {
            return true;
        }
        shared.waiting_receivers.load(Ordering::SeqCst) > 0 && self.subscribers.all_read()
    }
}

/// A subscription receive in progress
struct Demand<'a> {
    shared: &'a SessionShared,
}

impl<'a> Demand<'a> {
    fn register(shared: &'a SessionShared) -> Self {
        shared.waiting_receivers.fetch_add(1, Ordering::SeqCst);
        shared.demand.notify_one();
        Self { shared }
    }
}

impl Drop for Demand<'_> {
    fn drop(&mut self) {
        self.shared.waiting_receivers.fetch_sub(1, Ordering::SeqCst);
        self.shared.demand.notify_one();
    }
}

/// Receiving end of a subscription
///
/// Dropping it unsubscribes; the loop notices before its next receive.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Arc<Delivery>>,
    shared: Arc<SessionShared>,
}

impl Subscription {
    /// Next delivered message; `None` once the session is closed
    ///
    /// The consumer loop only fetches a message while some subscriber is
    /// waiting here. Cancelling the call is safe: a message delivered
    /// afterwards waits for the next call, or returns to the pending cache
    /// if every subscriber leaves first.
    pub async fn recv(&mut self) -> Option<ReceivedMessage> {
        let _demand = Demand::register(&self.shared);
        let delivery = self.receiver.recv().await?;
        Some(delivery.claim())
    }

    /// Next delivered message if one is already waiting
    pub fn try_recv(&mut self) -> Option<ReceivedMessage> {
        let delivery = self.receiver.try_recv().ok()?;
        self.shared.demand.notify_one();
        Some(delivery.claim())
    }

    /// Remove this subscription right away
    pub async fn unsubscribe(mut self) {
        self.receiver.close();
        let mut state = self.shared.state.lock().await;
        state.subscribers.remove(self.id);
        let remaining = state.live_subscribers(&self.shared);
        debug!(key = %self.shared.key, remaining, "Unsubscribed");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.receiver.close();
        self.shared.demand.notify_one();
    }
}

// ============================================================================
// Subscribing
// ============================================================================

impl MessageQueue {
    /// Register a subscriber and start the consumer loop if needed
    pub async fn subscribe(&self) -> Result<Subscription, QueueError> {
        let mut state = self.shared.state.lock().await;
        state.open_handle(self.shared.key)?;

        let (id, receiver) = state.subscribers.register();
        if state.consumer == ConsumerState::Idle {
            state.consumer = ConsumerState::Active;
            tokio::spawn(run_consumer(Arc::clone(&self.shared)));
            debug!(key = %self.shared.key, "Started consumer loop");
        }

        Ok(Subscription {
            id,
            receiver,
            shared: Arc::clone(&self.shared),
        })
    }

    /// Number of live subscribers
    pub async fn subscriber_count(&self) -> usize {
        let mut state = self.shared.state.lock().await;
        state.live_subscribers(&self.shared)
    }

    pub async fn consumer_state(&self) -> ConsumerState {
        self.shared.state.lock().await.consumer
    }

    /// Failure that stopped the most recent consumer loop
    pub async fn last_error(&self) -> Option<Arc<QueueError>> {
        self.shared.state.lock().await.last_error.clone()
    }

    /// Listen for consumer loop failures
    pub fn errors(&self) -> broadcast::Receiver<Arc<QueueError>> {
        self.shared.errors.subscribe()
    }
}

// ============================================================================
// Consumer Loop
// ============================================================================

/// Where the loop's next message comes from
enum Step {
    Stop,
    Cached(ReceivedMessage),
    Receive(QueueHandle),
}

impl SessionState {
    /// Decide the loop's next step; a stop marks the loop idle in the same
    /// critical section so a concurrent subscribe starts a fresh one
    fn consumer_step(&mut self, shared: &SessionShared) -> Step {
        let reason = if self.is_closed() {
            "session closed"
        } else if self.live_subscribers(shared) == 0 {
            "no subscribers"
        } else if let Some(message) = self
            .pending
            .take(TypeSelector::ANY, shared.options.cache_lookup)
        {
            return Step::Cached(message);
        } else if self.pending.blocks_consumer() {
            "pending cache full"
        } else {
            match self.open_handle(shared.key) {
                Ok(handle) => return Step::Receive(handle),
                Err(_) => "session closed",
            }
        };

        self.consumer = ConsumerState::Idle;
        debug!(key = %shared.key, reason, "Consumer loop stopped");
        Step::Stop
    }
}

/// Wait until a subscriber asks for a message and nobody lags behind
async fn wait_for_demand(shared: &SessionShared) {
    loop {
        let ready = shared.state.lock().await.ready_for_delivery(shared);
        if ready {
            return;
        }
        shared.demand.notified().await;
    }
}

async fn run_consumer(shared: Arc<SessionShared>) {
    loop {
        wait_for_demand(&shared).await;

        let step = shared.state.lock().await.consumer_step(&shared);
        match step {
            Step::Stop => return,
            Step::Cached(message) => dispatch(&shared, message).await,
            Step::Receive(_) => {
                // Held until the message is dispatched, so a pull waiting on
                // the gate finds it in the cache.
                let _gate = shared.receive_gate.lock().await;
                let recheck = shared.state.lock().await.consumer_step(&shared);
                let received = match recheck {
                    Step::Stop => return,
                    Step::Cached(message) => Ok(message),
                    Step::Receive(handle) => {
                        shared
                            .primitive
                            .receive(handle, MAX_MESSAGE_SIZE, TypeSelector::ANY.value(), 0)
                            .await
                    }
                };

                match received {
                    Ok(message) => dispatch(&shared, message).await,
                    Err(err) => {
                        fail(&shared, err).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn dispatch(shared: &SessionShared, message: ReceivedMessage) {
    let mut state = shared.state.lock().await;
    let delivery = Arc::new(Delivery::new(message));
    let delivered = state.subscribers.deliver(&delivery);
    if delivered > 0 {
        debug!(
            key = %shared.key,
            message_type = delivery.message.message_type,
            subscribers = delivered,
            "Delivered message"
        );
        state.in_flight = Some(delivery);
        return;
    }

    match state.pending.push(delivery.message.clone()) {
        PushOutcome::Stored => debug!(
            key = %shared.key,
            pending = state.pending.len(),
            "No subscriber for received message; cached"
        ),
        PushOutcome::Evicted(oldest) => warn!(
            key = %shared.key,
            message_type = oldest.message_type,
            bytes = oldest.len(),
            "Pending cache full; dropped oldest message"
        ),
    }
}

async fn fail(shared: &SessionShared, err: QueueError) {
    let err = Arc::new(err);
    {
        let mut state = shared.state.lock().await;
        state.consumer = ConsumerState::Idle;
        state.last_error = Some(Arc::clone(&err));
    }

    error!(key = %shared.key, error = %err, "Consumer loop failed");
    if shared.errors.send(err).is_err() {
        debug!(key = %shared.key, "No error listeners registered");
    }
}
