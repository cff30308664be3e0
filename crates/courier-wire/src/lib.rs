//! # Courier Wire Protocol
//!
//! Line-oriented protocol for talking to the exchange over a stream
//! transport (TCP or Unix socket). Each command is one space-separated
//! header line; when a body is declared it follows as exactly `bodyLen`
//! bytes terminated by CRLF.
//!
//! ## Commands (client → server)
//!
//! ```text
//! < timeout addr1 [addr2..addr8]          wait for a message
//! > bodyLen timeout toAddr [replyAddr]    fire-and-forget send
//! ! bodyLen timeout toAddr [replyAddr]    broadcast send
//! ? bodyLen timeout toAddr                request/reply query
//! .                                       close the connection
//! ```
//!
//! ## Frames (server → client)
//!
//! ```text
//! > bodyLen timeout toAddr [replyAddr]    a delivered message
//! *                                       the wait timed out
//! - message                               error; connection closes
//! ```
//!
//! Every command translates 1:1 into one exchange operation; the server
//! holds no broker state of its own. Declared body lengths are capped at
//! 16 MiB. Malformed input and I/O failures are fatal to the offending
//! connection only.

mod client;
mod codec;
mod error;
mod server;

pub use client::{Client, WireMessage};
pub use codec::{Command, FrameHeader};
pub use error::WireError;
pub use server::WireServer;
