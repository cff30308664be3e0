//! # Courier Exchange
//!
//! The core of the broker: a single serialized matching/timeout engine that
//! owns all mailbox state. Producers send [`Message`]s tagged with a
//! destination address; consumers wait on one or more addresses; whichever
//! side arrives first is queued until the other shows up or a deadline
//! expires.
//!
//! ## Architecture
//!
//! All mutable state lives inside one control-loop task. Callers talk to it
//! exclusively through the [`Exchange`] handle, which translates the four
//! public operations into requests on an mpsc channel:
//!
//! ```text
//!   send ──────────┐
//!   ready ─────────┤                ┌──────────────────┐
//!   query ─────────┼── requests ──→ │  control loop    │──→ oneshot replies
//!   reserve_addr ──┘                │  (sole owner of  │
//!                                   │  MailboxRegistry)│
//!   1s timer ─────────── tick ────→ └──────────────────┘
//! ```
//!
//! Serialization is structural: the loop processes one request at a time, so
//! the registry needs no locks and the producer/consumer race is resolved
//! first-come-first-served at the granularity of the request channel.
//!
//! ## Delivery semantics
//!
//! - Point-to-point: the oldest queued message goes to the oldest compatible
//!   waiter (FIFO per address), exactly once.
//! - Broadcast: every waiter currently registered on the address receives a
//!   copy, and the waiter queue for that address is cleared atomically.
//! - Timeouts: a periodic sweep expires stale messages silently and signals
//!   each stale waiter exactly once. Timeout is a first-class outcome
//!   (`None`), not an error.

mod address;
mod error;
mod exchange;
mod message;
mod registry;

pub use error::ExchangeError;
pub use exchange::{Exchange, MAX_WAIT_ADDRESSES, SWEEP_INTERVAL};
pub use message::Message;
