//! Gateway errors. Every failure is local to the HTTP request that caused
//! it; the client always receives an explicit error response, never a silent
//! drop.

use courier_exchange::ExchangeError;
use thiserror::Error;

/// Errors from relaying one HTTP request through the broker.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The broker rejected or could not accept an operation.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),

    /// Reading the inbound request body failed.
    #[error("failed to read request body: {0}")]
    RequestBody(String),

    /// No worker answered within the relay timeout.
    #[error("reply timed out")]
    ReplyTimeout,

    /// The worker's reply head was not the expected JSON shape.
    #[error("bad reply from worker: {0}")]
    BadReply(String),

    /// A streamed body chunk did not arrive within the relay timeout.
    #[error("reply body stream timed out")]
    StreamTimeout,
}
