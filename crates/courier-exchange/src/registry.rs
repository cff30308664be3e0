//! # Mailbox Registry
//!
//! Pure data structure holding both sides of the match: messages waiting for
//! a reader and readers waiting for a message, keyed by address. Owned
//! exclusively by the exchange control loop; nothing here does I/O or
//! touches a channel besides carrying the waiter's reply slot as opaque
//! cargo.
//!
//! A waiter listening on N addresses is enqueued on all N queues but exists
//! exactly once in the waiter table. Consumption removes it from the table
//! and from every queue it was listed on, so it can be satisfied or expired
//! exactly once.

use std::collections::{HashMap, VecDeque};

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::message::Message;

/// Identity of a registered waiter. Queue entries are ids; the table entry
/// is the single point of consumption.
pub(crate) type WaiterId = u64;

/// One blocked reader: the addresses it listens on, its expiry instant, and
/// the slot used to hand it exactly one message or the timeout sentinel.
#[derive(Debug)]
pub(crate) struct WaiterEntry {
    pub on_addresses: Vec<String>,
    pub deadline: Instant,
    pub slot: oneshot::Sender<Option<Message>>,
}

/// Address-keyed pending state for both sides of the match.
#[derive(Debug, Default)]
pub(crate) struct MailboxRegistry {
    /// FIFO message queues; insertion order is arrival order.
    messages: HashMap<String, VecDeque<Message>>,
    /// FIFO waiter queues of ids into `waiters`.
    waiter_queues: HashMap<String, VecDeque<WaiterId>>,
    /// The live waiter table.
    waiters: HashMap<WaiterId, WaiterEntry>,
    next_waiter_id: WaiterId,
}

impl MailboxRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Append a message to its destination queue.
    pub(crate) fn push_message(&mut self, message: Message) {
        self.messages
            .entry(message.to_address.clone())
            .or_default()
            .push_back(message);
    }

    /// Pop the oldest live message queued for `address`. Messages whose
    /// deadline has already passed are dropped on the way, so a dead message
    /// is never matched to a waiter that arrived after its deadline.
    pub(crate) fn pop_message(&mut self, address: &str, now: Instant) -> Option<Message> {
        let queue = self.messages.get_mut(address)?;
        let mut popped = None;
        while let Some(message) = queue.pop_front() {
            if message.expired_at(now) {
                continue;
            }
            popped = Some(message);
            break;
        }
        if queue.is_empty() {
            self.messages.remove(address);
        }
        popped
    }

    /// Register a waiter on every address it listed, in listed order.
    pub(crate) fn insert_waiter(&mut self, entry: WaiterEntry) -> WaiterId {
        let id = self.next_waiter_id;
        self.next_waiter_id += 1;
        for address in &entry.on_addresses {
            self.waiter_queues
                .entry(address.clone())
                .or_default()
                .push_back(id);
        }
        self.waiters.insert(id, entry);
        id
    }

    /// Consume the oldest waiter queued on `address`, removing it from every
    /// other queue it was listed on.
    pub(crate) fn pop_waiter(&mut self, address: &str) -> Option<WaiterEntry> {
        let id = *self.waiter_queues.get(address)?.front()?;
        self.remove_waiter(id)
    }

    /// Consume every waiter currently queued on `address`, oldest first.
    /// Used for broadcast fan-out; the queue is left empty.
    pub(crate) fn take_all_waiters(&mut self, address: &str) -> Vec<WaiterEntry> {
        let Some(queue) = self.waiter_queues.get(address) else {
            return Vec::new();
        };
        let ids: Vec<WaiterId> = queue.iter().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.remove_waiter(id))
            .collect()
    }

    /// Whether any waiter is currently registered on `address`.
    pub(crate) fn has_waiters(&self, address: &str) -> bool {
        self.waiter_queues.contains_key(address)
    }

    /// Remove every expired message and consume every expired waiter.
    /// Returns the expired waiters so the loop can signal each exactly once;
    /// consumption through `remove_waiter` guarantees a waiter listed on
    /// several expiring addresses is returned a single time.
    pub(crate) fn sweep(&mut self, now: Instant) -> (usize, Vec<WaiterEntry>) {
        let mut dropped = 0;
        self.messages.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|message| !message.expired_at(now));
            dropped += before - queue.len();
            !queue.is_empty()
        });

        let expired: Vec<WaiterId> = self
            .waiters
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        let timed_out = expired
            .into_iter()
            .filter_map(|id| self.remove_waiter(id))
            .collect();
        (dropped, timed_out)
    }

    /// Take a waiter out of the table and scrub its id from every queue it
    /// was listed on, dropping queues that become empty.
    fn remove_waiter(&mut self, id: WaiterId) -> Option<WaiterEntry> {
        let entry = self.waiters.remove(&id)?;
        for address in &entry.on_addresses {
            if let Some(queue) = self.waiter_queues.get_mut(address) {
                queue.retain(|queued| *queued != id);
                if queue.is_empty() {
                    self.waiter_queues.remove(address);
                }
            }
        }
        Some(entry)
    }

    #[cfg(test)]
    pub(crate) fn queued_message_count(&self, address: &str) -> usize {
        self.messages.get(address).map_or(0, VecDeque::len)
    }

    #[cfg(test)]
    pub(crate) fn waiter_count(&self) -> usize {
        self.waiters.len()
    }
}
