//! # Wire Codec
//!
//! Parsing and encoding for the line-oriented protocol, plus the shared
//! body-reading helper. Pure functions where possible so the grammar is
//! testable without sockets.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::WireError;

pub(crate) const READY_CMD: &str = "<";
pub(crate) const MESSAGE_CMD: &str = ">";
pub(crate) const BROADCAST_CMD: &str = "!";
pub(crate) const QUERY_CMD: &str = "?";
pub(crate) const QUIT_CMD: &str = ".";
pub(crate) const TIMEOUT_CMD: &str = "*";
pub(crate) const ERROR_CMD: &str = "-";

/// The timeout frame, complete with terminator.
pub(crate) const TIMEOUT_FRAME: &[u8] = b"*\r\n";

/// Upper bound on a declared body length. The length is peer-supplied, so it
/// must be validated before it sizes an allocation.
pub(crate) const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// One parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Wait for a message on any of the listed addresses.
    Ready {
        timeout_secs: u64,
        on_addresses: Vec<String>,
    },
    /// Fire-and-forget send; `broadcast` selects fan-out delivery.
    Send {
        body_len: usize,
        timeout_secs: u64,
        to_address: String,
        reply_address: Option<String>,
        broadcast: bool,
    },
    /// Request/reply query.
    Query {
        body_len: usize,
        timeout_secs: u64,
        to_address: String,
    },
    /// Close the connection.
    Quit,
}

/// One parsed server frame header (client side).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameHeader {
    /// A delivered message; `body_len` bytes follow.
    Message {
        body_len: usize,
        timeout_secs: u64,
        to_address: String,
        reply_address: Option<String>,
    },
    /// The wait timed out without a match.
    Timeout,
    /// The server reported an error and will close the connection.
    Error(String),
}

/// Parse one command line. The line is expected without its terminator.
pub(crate) fn parse_command(line: &str) -> Result<Command, WireError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let Some((&command, params)) = fields.split_first() else {
        return Err(WireError::protocol("empty command"));
    };

    match command {
        READY_CMD => {
            if params.len() < 2 {
                return Err(WireError::protocol(
                    "ready format: < timeout onAddr1 [onAddr2..onAddr8]",
                ));
            }
            Ok(Command::Ready {
                timeout_secs: parse_timeout(params[0])?,
                on_addresses: params[1..].iter().map(|a| (*a).to_owned()).collect(),
            })
        }
        MESSAGE_CMD | BROADCAST_CMD => {
            if params.len() < 3 || params.len() > 4 {
                return Err(WireError::protocol(
                    "message format: > bodyLen timeout toAddr [replyAddr]",
                ));
            }
            Ok(Command::Send {
                body_len: parse_body_len(params[0])?,
                timeout_secs: parse_timeout(params[1])?,
                to_address: params[2].to_owned(),
                reply_address: params.get(3).map(|a| (*a).to_owned()),
                broadcast: command == BROADCAST_CMD,
            })
        }
        QUERY_CMD => {
            if params.len() != 3 {
                return Err(WireError::protocol("query format: ? bodyLen timeout toAddr"));
            }
            Ok(Command::Query {
                body_len: parse_body_len(params[0])?,
                timeout_secs: parse_timeout(params[1])?,
                to_address: params[2].to_owned(),
            })
        }
        QUIT_CMD => Ok(Command::Quit),
        _ => Err(WireError::protocol("invalid command")),
    }
}

/// Parse one server frame header line (client side).
pub(crate) fn parse_frame_header(line: &str) -> Result<FrameHeader, WireError> {
    let trimmed = line.trim();
    if trimmed == TIMEOUT_CMD {
        return Ok(FrameHeader::Timeout);
    }
    if let Some(message) = trimmed.strip_prefix(ERROR_CMD) {
        return Ok(FrameHeader::Error(message.trim_start().to_owned()));
    }

    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    match fields.split_first() {
        Some((&MESSAGE_CMD, params)) if (3..=4).contains(&params.len()) => {
            Ok(FrameHeader::Message {
                body_len: parse_body_len(params[0])?,
                timeout_secs: parse_timeout(params[1])?,
                to_address: params[2].to_owned(),
                reply_address: params.get(3).map(|a| (*a).to_owned()),
            })
        }
        _ => Err(WireError::protocol("invalid frame from server")),
    }
}

/// Encode a delivered-message frame: header line, then the body followed by
/// CRLF when non-empty.
pub(crate) fn encode_message_frame(
    to_address: &str,
    reply_address: Option<&str>,
    timeout_secs: u64,
    body: &[u8],
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(body.len() + 64);
    frame.extend_from_slice(MESSAGE_CMD.as_bytes());
    frame.extend_from_slice(format!(" {} {} {}", body.len(), timeout_secs, to_address).as_bytes());
    if let Some(reply) = reply_address {
        frame.extend_from_slice(format!(" {reply}").as_bytes());
    }
    frame.extend_from_slice(b"\r\n");
    if !body.is_empty() {
        frame.extend_from_slice(body);
        frame.extend_from_slice(b"\r\n");
    }
    frame
}

/// Encode an error frame. Line breaks in the text would corrupt the framing,
/// so they are flattened.
pub(crate) fn encode_error_frame(message: &str) -> Vec<u8> {
    let flat: String = message
        .chars()
        .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
        .collect();
    format!("{ERROR_CMD} {flat}\r\n").into_bytes()
}

/// Read one line, without its terminator. `Ok(None)` means clean EOF.
pub(crate) async fn read_line<R>(reader: &mut R) -> Result<Option<String>, WireError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = match reader.read_line(&mut line).await {
        Ok(n) => n,
        // Garbage bytes are the peer's protocol violation, not our I/O
        // failure; the caller reports them with an error frame.
        Err(error) if error.kind() == std::io::ErrorKind::InvalidData => {
            return Err(WireError::protocol("line must be valid utf-8"));
        }
        Err(error) => return Err(error.into()),
    };
    if n == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
}

/// Read a declared body: exactly `body_len` bytes plus the CRLF terminator.
pub(crate) async fn read_body<R>(reader: &mut R, body_len: usize) -> Result<Vec<u8>, WireError>
where
    R: AsyncBufRead + Unpin,
{
    // Parsed lengths are already capped; re-check so the allocation below
    // can never be sized by an unvalidated value.
    if body_len > MAX_BODY_LEN {
        return Err(WireError::protocol("body length exceeds maximum"));
    }
    let mut buffer = vec![0u8; body_len + 2];
    reader.read_exact(&mut buffer).await?;
    if buffer[body_len] != b'\r' || buffer[body_len + 1] != b'\n' {
        return Err(WireError::BadBodyTerminator);
    }
    buffer.truncate(body_len);
    Ok(buffer)
}

fn parse_timeout(field: &str) -> Result<u64, WireError> {
    field
        .parse()
        .map_err(|_| WireError::protocol("invalid timeout format"))
}

fn parse_body_len(field: &str) -> Result<usize, WireError> {
    let body_len: usize = field
        .parse()
        .map_err(|_| WireError::protocol("invalid body length format"))?;
    if body_len > MAX_BODY_LEN {
        return Err(WireError::protocol("body length exceeds maximum"));
    }
    Ok(body_len)
}
