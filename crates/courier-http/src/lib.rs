//! # Courier HTTP Gateway
//!
//! Bridges HTTP clients to broker workers. One inbound HTTP request becomes
//! one broker query: the request line and headers are serialized into a JSON
//! envelope and sent to a configured address, the raw request body is routed
//! to a second freshly generated address, and the worker's reply (a JSON
//! `[status, [k1, v1, ...]]` head followed by streamed body chunks) is
//! translated back into the HTTP response.
//!
//! ```text
//! client ──HTTP──→ gateway ──envelope──→ worker address
//!                     │    ──body─────→ body address
//!                     ←──reply head────  reply address
//!                     ←──body chunks───  reply address (empty chunk ends)
//! ```
//!
//! The gateway holds no broker state; it is a pure translation layer over
//! the exchange's `send`/`query`-shaped operations with a fixed 180 s wait.

mod envelope;
mod error;
mod gateway;

pub use envelope::{ReplyHead, RequestEnvelope};
pub use error::GatewayError;
pub use gateway::{HttpGateway, HTTP_RELAY_TIMEOUT_SECS};
