//! Wire-level errors. Protocol violations are reported to the offending
//! connection as a single `-` frame before it is closed; transport failures
//! are fatal to the connection with nothing written.

use courier_exchange::ExchangeError;
use thiserror::Error;

/// Errors from the wire codec, server, and client.
#[derive(Debug, Error)]
pub enum WireError {
    /// The peer sent something the grammar does not allow.
    #[error("{0}")]
    Protocol(String),

    /// A declared body was not terminated by CRLF.
    #[error("body must be followed by \\r\\n")]
    BadBodyTerminator,

    /// The peer closed the connection mid-exchange.
    #[error("connection closed")]
    ConnectionClosed,

    /// The server answered with an error frame (client side).
    #[error("server error: {0}")]
    Server(String),

    /// Socket read/write failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The broker rejected or could not accept the operation.
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

impl WireError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
