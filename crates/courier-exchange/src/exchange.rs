//! # Exchange Control Loop
//!
//! One spawned task owns the [`MailboxRegistry`] and the address generator
//! and processes requests strictly one at a time. The [`Exchange`] handle is
//! the only way in; it is cheap to clone and safe to share across any number
//! of caller tasks.
//!
//! The loop never performs I/O and never calls back into caller code:
//! delivery is a non-blocking `oneshot` send, so a slow or vanished caller
//! cannot stall matching for other addresses.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::address::AddressGenerator;
use crate::error::ExchangeError;
use crate::message::Message;
use crate::registry::{MailboxRegistry, WaiterEntry};

/// Maximum addresses one wait may listen on. The bound is documented API,
/// not a storage constraint; it caps worst-case registration cost.
pub const MAX_WAIT_ADDRESSES: usize = 8;

/// Period of the expiry sweep. Entries may linger up to one period past
/// their nominal deadline; that slop buys O(1) timer bookkeeping.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Depth of the request channel feeding the control loop.
const REQUEST_QUEUE_DEPTH: usize = 256;

/// Requests accepted by the control loop.
enum Request {
    /// Deliver or queue a message (fire-and-forget toward the caller).
    Deliver(Message),
    /// Register a waiter, or resolve it immediately from a queued message.
    Register {
        on_addresses: Vec<String>,
        deadline: Instant,
        slot: oneshot::Sender<Option<Message>>,
    },
    /// Generate an address unused by any live waiter.
    ReserveAddress { slot: oneshot::Sender<String> },
}

/// Handle to a running exchange. Cloning shares the same engine; the engine
/// shuts down when every handle has been dropped.
#[derive(Clone, Debug)]
pub struct Exchange {
    requests: mpsc::Sender<Request>,
}

impl Exchange {
    /// Spawn the control loop and return a handle to it.
    #[must_use]
    pub fn new() -> Self {
        let (requests, inbox) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        tokio::spawn(run_control_loop(inbox));
        Self { requests }
    }

    /// Fire-and-forget delivery. Returns once the message has been handed to
    /// the control loop; there is no delivery acknowledgement.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Closed`] if the engine has shut down.
    pub async fn send(&self, message: Message) -> Result<(), ExchangeError> {
        self.requests
            .send(Request::Deliver(message))
            .await
            .map_err(|_| ExchangeError::Closed)
    }

    /// Block until a message arrives on any of `on_addresses` or
    /// `timeout_secs` elapses. `None` is the timeout outcome.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::NoAddresses`] / [`ExchangeError::TooManyAddresses`]
    /// for an invalid address list, [`ExchangeError::Closed`] if the engine
    /// has shut down.
    pub async fn ready(
        &self,
        on_addresses: Vec<String>,
        timeout_secs: u64,
    ) -> Result<Option<Message>, ExchangeError> {
        if on_addresses.is_empty() {
            return Err(ExchangeError::NoAddresses);
        }
        if on_addresses.len() > MAX_WAIT_ADDRESSES {
            return Err(ExchangeError::TooManyAddresses(on_addresses.len()));
        }

        let (slot, resolved) = oneshot::channel();
        self.requests
            .send(Request::Register {
                on_addresses,
                deadline: Instant::now() + Duration::from_secs(timeout_secs),
                slot,
            })
            .await
            .map_err(|_| ExchangeError::Closed)?;
        resolved.await.map_err(|_| ExchangeError::Closed)
    }

    /// Request/reply: send `body` to `to_address` with a freshly reserved
    /// reply address attached, then wait for the reply or the timeout.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Closed`] if the engine has shut down.
    pub async fn query(
        &self,
        to_address: impl Into<String>,
        timeout_secs: u64,
        body: Bytes,
    ) -> Result<Option<Message>, ExchangeError> {
        let reply_address = self.reserve_address().await?;
        self.send(
            Message::new(to_address, None, timeout_secs, body)
                .with_reply_address(reply_address.clone()),
        )
        .await?;
        self.ready(vec![reply_address], timeout_secs).await
    }

    /// Generate an address guaranteed unused among live waiters at the
    /// moment of generation. No reservation outlives that moment.
    ///
    /// # Errors
    ///
    /// [`ExchangeError::Closed`] if the engine has shut down.
    pub async fn reserve_address(&self) -> Result<String, ExchangeError> {
        let (slot, resolved) = oneshot::channel();
        self.requests
            .send(Request::ReserveAddress { slot })
            .await
            .map_err(|_| ExchangeError::Closed)?;
        resolved.await.map_err(|_| ExchangeError::Closed)
    }
}

impl Default for Exchange {
    fn default() -> Self {
        Self::new()
    }
}

/// The sequential loop. Exits when the last handle is dropped.
async fn run_control_loop(mut inbox: mpsc::Receiver<Request>) {
    let mut registry = MailboxRegistry::new();
    let mut generator = AddressGenerator::new();

    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!("exchange control loop started");
    loop {
        tokio::select! {
            request = inbox.recv() => match request {
                Some(Request::Deliver(message)) => handle_deliver(&mut registry, message),
                Some(Request::Register { on_addresses, deadline, slot }) => {
                    handle_register(&mut registry, on_addresses, deadline, slot);
                }
                Some(Request::ReserveAddress { slot }) => {
                    handle_reserve(&registry, &mut generator, slot);
                }
                None => break,
            },
            _ = ticker.tick() => handle_tick(&mut registry, Instant::now()),
        }
    }
    debug!("exchange control loop stopped");
}

/// Match a message against waiting readers, or queue it.
fn handle_deliver(registry: &mut MailboxRegistry, message: Message) {
    debug!(
        address = %message.to_address,
        reply = message.reply_address.as_deref().unwrap_or(""),
        bytes = message.body.len(),
        broadcast = message.broadcast,
        "message received",
    );

    if message.broadcast && registry.has_waiters(&message.to_address) {
        let waiters = registry.take_all_waiters(&message.to_address);
        let fanned_out = waiters.len();
        for waiter in waiters {
            // A vanished caller just drops its copy.
            let _ = waiter.slot.send(Some(message.clone()));
        }
        debug!(address = %message.to_address, waiters = fanned_out, "broadcast fan-out");
        return;
    }

    while let Some(waiter) = registry.pop_waiter(&message.to_address) {
        match waiter.slot.send(Some(message.clone())) {
            Ok(()) => {
                debug!(address = %message.to_address, "message delivered");
                return;
            }
            // The waiting caller is gone (dropped its future); try the next
            // one rather than losing the message.
            Err(_) => trace!(address = %message.to_address, "waiter vanished, trying next"),
        }
    }

    debug!(address = %message.to_address, "message queued");
    registry.push_message(message);
}

/// Resolve a waiter from a queued message, or register it.
fn handle_register(
    registry: &mut MailboxRegistry,
    on_addresses: Vec<String>,
    deadline: Instant,
    slot: oneshot::Sender<Option<Message>>,
) {
    trace!(addresses = ?on_addresses, "waiter received");

    let now = Instant::now();
    for address in &on_addresses {
        if let Some(message) = registry.pop_message(address, now) {
            debug!(address = %address, "queued message handed to waiter");
            let _ = slot.send(Some(message));
            return;
        }
    }

    trace!(addresses = ?on_addresses, "waiter registered");
    registry.insert_waiter(WaiterEntry {
        on_addresses,
        deadline,
        slot,
    });
}

/// Generate candidates until one is not watched by any live waiter.
fn handle_reserve(
    registry: &MailboxRegistry,
    generator: &mut AddressGenerator,
    slot: oneshot::Sender<String>,
) {
    let address = loop {
        let candidate = generator.next_candidate();
        if !registry.has_waiters(&candidate) {
            break candidate;
        }
        warn!("ephemeral address collision, regenerating");
    };
    trace!(address = %address, "address reserved");
    let _ = slot.send(address);
}

/// Periodic sweep: drop expired messages, signal each expired waiter its
/// single timeout sentinel.
fn handle_tick(registry: &mut MailboxRegistry, now: Instant) {
    let (dropped, timed_out) = registry.sweep(now);
    if dropped > 0 {
        debug!(count = dropped, "expired messages dropped");
    }
    for waiter in timed_out {
        debug!(addresses = ?waiter.on_addresses, "waiter timed out");
        let _ = waiter.slot.send(None);
    }
}
