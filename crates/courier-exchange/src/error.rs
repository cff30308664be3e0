//! Errors surfaced by the exchange's public operations. A timeout is not an
//! error; it is the `None` outcome of `ready`/`query`.

use thiserror::Error;

/// Errors from exchange operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// The control loop has shut down; no further requests are accepted.
    #[error("exchange is closed")]
    Closed,

    /// A wait listed no addresses.
    #[error("wait must list at least one address")]
    NoAddresses,

    /// A wait listed more addresses than the documented maximum.
    #[error("wait listed {0} addresses, maximum is {max}", max = crate::MAX_WAIT_ADDRESSES)]
    TooManyAddresses(usize),
}
