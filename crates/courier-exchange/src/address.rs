//! # Address Generation
//!
//! Produces candidate ephemeral addresses used to correlate replies. A
//! candidate doubles as an unguessable capability token, so the bulk of it
//! is 128 bits of randomness; a monotonic counter is mixed in to make
//! candidates distinct even under a misbehaving entropy source. Uniqueness
//! against live waiters is the control loop's job, not ours.

use uuid::Uuid;

/// Stateful candidate producer. One instance lives inside the control loop.
#[derive(Debug, Default)]
pub(crate) struct AddressGenerator {
    counter: u64,
}

impl AddressGenerator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Produce the next candidate address.
    pub(crate) fn next_candidate(&mut self) -> String {
        self.counter = self.counter.wrapping_add(1);
        format!("{:x}.{}", self.counter, Uuid::new_v4().simple())
    }
}
