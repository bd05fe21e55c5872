//! Messages received by the consumer loop that nobody was subscribed for.
//!
//! The loop appends at the tail; pull receives and later subscribers take
//! from it before the primitive is asked for anything new.

use crate::config::{CacheLookup, OverflowPolicy, PendingCacheConfig};
use crate::message::{ReceivedMessage, TypeSelector};
use std::collections::VecDeque;

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;

/// Result of appending to the cache
#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Stored,
    /// The oldest message was dropped to make room
    Evicted(ReceivedMessage),
}

/// Ordered cache of retrieved-but-undelivered messages
#[derive(Debug)]
pub struct PendingMessages {
    messages: VecDeque<ReceivedMessage>,
    config: PendingCacheConfig,
}

impl PendingMessages {
    pub fn new(config: PendingCacheConfig) -> Self {
        Self {
            messages: VecDeque::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True once the configured capacity is reached
    pub fn is_full(&self) -> bool {
        self.config
            .capacity
            .is_some_and(|capacity| self.messages.len() >= capacity)
    }

    /// True when the consumer loop must not fetch more messages
    pub fn blocks_consumer(&self) -> bool {
        self.config.overflow == OverflowPolicy::StopLoop && self.is_full()
    }

    /// Append a message at the tail
    ///
    /// Under [`OverflowPolicy::StopLoop`] the message is always kept, even past
    /// capacity; the loop is stopped instead.
    pub fn push(&mut self, message: ReceivedMessage) -> PushOutcome {
        self.messages.push_back(message);

        let over_capacity = self
            .config
            .capacity
            .is_some_and(|capacity| self.messages.len() > capacity);
        if over_capacity && self.config.overflow == OverflowPolicy::DropOldest {
            if let Some(oldest) = self.messages.pop_front() {
                return PushOutcome::Evicted(oldest);
            }
        }

        PushOutcome::Stored
    }

    /// Remove the oldest message satisfying `selector`
    pub fn take(&mut self, selector: TypeSelector, lookup: CacheLookup) -> Option<ReceivedMessage> {
        let index = match lookup {
            CacheLookup::AnyType => 0,
            CacheLookup::TypeAware => {
                let types = self.messages.iter().map(|m| m.message_type);
                selector.select(types, false)?
            }
        };

        self.messages.remove(index)
    }

    /// Put a message that was taken but never handed out back at the head
    ///
    /// Capacity is not enforced; the message was already off the queue.
    pub fn restore(&mut self, message: ReceivedMessage) {
        self.messages.push_front(message);
    }
}

impl Default for PendingMessages {
    fn default() -> Self {
        Self::new(PendingCacheConfig::default())
    }
}
