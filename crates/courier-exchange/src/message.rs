//! # Message
//!
//! The immutable value routed by the exchange. Created by a `send` or
//! `query` caller, owned by the control loop while queued, and dropped on
//! delivery or expiry.

use bytes::Bytes;
use std::time::Duration;
use tokio::time::Instant;

/// A message addressed to a mailbox.
#[derive(Clone, Debug)]
pub struct Message {
    /// Destination address.
    pub to_address: String,

    /// Address a reply is expected on, if any.
    pub reply_address: Option<String>,

    /// Deliver a copy to every current waiter instead of one.
    pub broadcast: bool,

    /// Opaque payload.
    pub body: Bytes,

    /// Requested lifetime in seconds, echoed on the wire.
    pub timeout_secs: u64,

    /// Absolute expiry instant, fixed at creation.
    pub(crate) deadline: Instant,
}

impl Message {
    /// Create a point-to-point message. The deadline is computed once, here,
    /// from the caller-supplied timeout.
    #[must_use]
    pub fn new(
        to_address: impl Into<String>,
        reply_address: Option<String>,
        timeout_secs: u64,
        body: Bytes,
    ) -> Self {
        Self {
            to_address: to_address.into(),
            reply_address,
            broadcast: false,
            body,
            timeout_secs,
            deadline: Instant::now() + Duration::from_secs(timeout_secs),
        }
    }

    /// Create a broadcast message.
    #[must_use]
    pub fn broadcast(to_address: impl Into<String>, timeout_secs: u64, body: Bytes) -> Self {
        Self {
            broadcast: true,
            ..Self::new(to_address, None, timeout_secs, body)
        }
    }

    /// Attach a reply address.
    #[must_use]
    pub fn with_reply_address(mut self, reply_address: impl Into<String>) -> Self {
        self.reply_address = Some(reply_address.into());
        self
    }

    /// Whether the deadline has passed as of `now`. A zero timeout expires
    /// immediately.
    pub(crate) fn expired_at(&self, now: Instant) -> bool {
        self.deadline <= now
    }
}
