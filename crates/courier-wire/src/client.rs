//! # Wire Client
//!
//! A small client for the wire protocol, used by the integration suite and
//! by external consumers that want typed access instead of hand-rolled
//! frames. One client owns one connection; commands are issued
//! sequentially, mirroring the server's per-connection processing.

use std::path::Path;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, UnixStream};

use crate::codec::{self, FrameHeader, BROADCAST_CMD, MESSAGE_CMD, QUERY_CMD, QUIT_CMD, READY_CMD};
use crate::error::WireError;

/// A message as observed by a wire client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    /// Address the message was delivered on.
    pub to_address: String,
    /// Address a reply is expected on, if any.
    pub reply_address: Option<String>,
    /// Remaining lifetime in seconds as reported by the broker.
    pub timeout_secs: u64,
    /// Opaque payload.
    pub body: Bytes,
}

type BoxedRead = Box<dyn AsyncRead + Unpin + Send>;
type BoxedWrite = Box<dyn AsyncWrite + Unpin + Send>;

/// A connection to a wire server.
pub struct Client {
    reader: BufReader<BoxedRead>,
    writer: BoxedWrite,
}

impl Client {
    /// Connect over TCP.
    ///
    /// # Errors
    ///
    /// Propagates the connect failure.
    pub async fn connect_tcp(address: &str) -> Result<Self, WireError> {
        let stream = TcpStream::connect(address).await?;
        Ok(Self::from_stream(stream))
    }

    /// Connect over a Unix socket.
    ///
    /// # Errors
    ///
    /// Propagates the connect failure.
    pub async fn connect_unix(path: impl AsRef<Path>) -> Result<Self, WireError> {
        let stream = UnixStream::connect(path).await?;
        Ok(Self::from_stream(stream))
    }

    fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: BufReader::new(Box::new(read_half) as BoxedRead),
            writer: Box::new(write_half),
        }
    }

    /// Wait for a message on any of `on_addresses`. `None` is the timeout
    /// outcome.
    ///
    /// # Errors
    ///
    /// [`WireError::Server`] when the server answers with an error frame;
    /// transport errors otherwise.
    pub async fn ready(
        &mut self,
        timeout_secs: u64,
        on_addresses: &[&str],
    ) -> Result<Option<WireMessage>, WireError> {
        let header = format!("{READY_CMD} {timeout_secs} {}\r\n", on_addresses.join(" "));
        self.writer.write_all(header.as_bytes()).await?;
        self.writer.flush().await?;
        self.read_message().await
    }

    /// Fire-and-forget send. No acknowledgement is read; the next command on
    /// this connection would surface any error frame.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn send(
        &mut self,
        to_address: &str,
        reply_address: Option<&str>,
        timeout_secs: u64,
        body: &[u8],
    ) -> Result<(), WireError> {
        self.write_send_command(MESSAGE_CMD, to_address, reply_address, timeout_secs, body)
            .await
    }

    /// Fire-and-forget broadcast send.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn send_broadcast(
        &mut self,
        to_address: &str,
        timeout_secs: u64,
        body: &[u8],
    ) -> Result<(), WireError> {
        self.write_send_command(BROADCAST_CMD, to_address, None, timeout_secs, body)
            .await
    }

    /// Request/reply query. `None` is the timeout outcome.
    ///
    /// # Errors
    ///
    /// [`WireError::Server`] when the server answers with an error frame;
    /// transport errors otherwise.
    pub async fn query(
        &mut self,
        to_address: &str,
        timeout_secs: u64,
        body: &[u8],
    ) -> Result<Option<WireMessage>, WireError> {
        let header = format!("{QUERY_CMD} {} {timeout_secs} {to_address}\r\n", body.len());
        self.writer.write_all(header.as_bytes()).await?;
        self.write_body(body).await?;
        self.writer.flush().await?;
        self.read_message().await
    }

    /// Tell the server to close the connection.
    ///
    /// # Errors
    ///
    /// Transport errors only.
    pub async fn quit(mut self) -> Result<(), WireError> {
        self.writer.write_all(format!("{QUIT_CMD}\r\n").as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_send_command(
        &mut self,
        command: &str,
        to_address: &str,
        reply_address: Option<&str>,
        timeout_secs: u64,
        body: &[u8],
    ) -> Result<(), WireError> {
        let mut header = format!("{command} {} {timeout_secs} {to_address}", body.len());
        if let Some(reply) = reply_address {
            header.push(' ');
            header.push_str(reply);
        }
        header.push_str("\r\n");
        self.writer.write_all(header.as_bytes()).await?;
        self.write_body(body).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn write_body(&mut self, body: &[u8]) -> Result<(), WireError> {
        if body.is_empty() {
            return Ok(());
        }
        self.writer.write_all(body).await?;
        self.writer.write_all(b"\r\n").await?;
        Ok(())
    }

    /// Read one message or timeout frame; error frames become
    /// [`WireError::Server`].
    async fn read_message(&mut self) -> Result<Option<WireMessage>, WireError> {
        let line = codec::read_line(&mut self.reader)
            .await?
            .ok_or(WireError::ConnectionClosed)?;
        match codec::parse_frame_header(&line)? {
            FrameHeader::Timeout => Ok(None),
            FrameHeader::Error(message) => Err(WireError::Server(message)),
            FrameHeader::Message {
                body_len,
                timeout_secs,
                to_address,
                reply_address,
            } => {
                let body = if body_len == 0 {
                    Bytes::new()
                } else {
                    Bytes::from(codec::read_body(&mut self.reader, body_len).await?)
                };
                Ok(Some(WireMessage {
                    to_address,
                    reply_address,
                    timeout_secs,
                    body,
                }))
            }
        }
    }
}
