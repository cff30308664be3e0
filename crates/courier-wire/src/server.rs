//! # Wire Server
//!
//! Accept loop plus one task per connection. Each parsed command becomes
//! exactly one exchange operation; all broker state stays in the exchange.
//! A protocol violation gets a single error frame and the connection is
//! closed; an I/O failure closes the connection silently. Other connections
//! are never affected.

use std::path::Path;

use courier_exchange::{Exchange, Message};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec::{self, Command};
use crate::error::WireError;

/// A bound wire protocol server. Construct with [`WireServer::bind_tcp`] or
/// [`WireServer::bind_unix`], then drive it with [`WireServer::run`].
#[derive(Debug)]
pub struct WireServer {
    exchange: Exchange,
    listener: Listener,
}

#[derive(Debug)]
enum Listener {
    Tcp(TcpListener),
    Unix(UnixListener),
}

impl WireServer {
    /// Bind a TCP listener.
    ///
    /// # Errors
    ///
    /// Propagates the bind failure.
    pub async fn bind_tcp(exchange: Exchange, address: &str) -> Result<Self, WireError> {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, transport = "tcp", "wire server listening");
        Ok(Self {
            exchange,
            listener: Listener::Tcp(listener),
        })
    }

    /// Bind a Unix socket listener, replacing any stale socket file and
    /// opening permissions so local clients of any user may connect.
    ///
    /// # Errors
    ///
    /// Propagates the bind failure.
    pub fn bind_unix(exchange: Exchange, path: impl AsRef<Path>) -> Result<Self, WireError> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::os::unix::fs::PermissionsExt::from_mode(0o777))?;
        info!(path = %path.display(), transport = "unix", "wire server listening");
        Ok(Self {
            exchange,
            listener: Listener::Unix(listener),
        })
    }

    /// The bound TCP address, when listening on TCP. Useful with port 0.
    ///
    /// # Errors
    ///
    /// Propagates the socket introspection failure.
    pub fn local_addr(&self) -> Result<Option<std::net::SocketAddr>, WireError> {
        match &self.listener {
            Listener::Tcp(listener) => Ok(Some(listener.local_addr()?)),
            Listener::Unix(_) => Ok(None),
        }
    }

    /// Accept connections until the shutdown signal flips.
    ///
    /// # Errors
    ///
    /// Returns only on a fatal accept failure.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WireError> {
        loop {
            tokio::select! {
                accepted = self.accept() => {
                    match accepted {
                        Ok(()) => {}
                        Err(error) => {
                            warn!(%error, "accept failed");
                            return Err(error);
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("wire server shutting down");
                    return Ok(());
                }
            }
        }
    }

    async fn accept(&self) -> Result<(), WireError> {
        match &self.listener {
            Listener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                debug!(%peer, "connection accepted");
                let exchange = self.exchange.clone();
                tokio::spawn(handle_connection(exchange, stream));
            }
            Listener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                debug!("connection accepted");
                let exchange = self.exchange.clone();
                tokio::spawn(handle_connection(exchange, stream));
            }
        }
        Ok(())
    }
}

/// Serve one connection to completion.
async fn handle_connection<S>(exchange: Exchange, stream: S)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, mut write_half) = tokio::io::split(stream);
    let mut reader = BufReader::new(read_half);

    loop {
        let outcome = match codec::read_line(&mut reader).await {
            Ok(Some(line)) => match codec::parse_command(&line) {
                Ok(Command::Quit) => break,
                Ok(command) => dispatch(&exchange, command, &mut reader, &mut write_half).await,
                Err(error) => Err(error),
            },
            // Clean EOF: the peer hung up without `.`, nothing to report.
            Ok(None) => break,
            // Unreadable input is still the peer's protocol violation and is
            // reported below like any other.
            Err(error) => Err(error),
        };

        match outcome {
            Ok(()) => {}
            // Protocol and broker-level problems: one error frame, then close.
            Err(error @ (WireError::Protocol(_) | WireError::BadBodyTerminator | WireError::Exchange(_))) => {
                let _ = write_half.write_all(&codec::encode_error_frame(&error.to_string())).await;
                let _ = write_half.flush().await;
                break;
            }
            // Transport failure: nothing we can usefully write.
            Err(error) => {
                debug!(%error, "connection failed");
                break;
            }
        }
    }
    debug!("connection closed");
}

/// Translate one command into one exchange operation and answer the peer.
async fn dispatch<R, W>(
    exchange: &Exchange,
    command: Command,
    reader: &mut R,
    writer: &mut W,
) -> Result<(), WireError>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    match command {
        Command::Ready {
            timeout_secs,
            on_addresses,
        } => {
            let outcome = exchange.ready(on_addresses, timeout_secs).await?;
            write_outcome(writer, outcome).await
        }
        Command::Send {
            body_len,
            timeout_secs,
            to_address,
            reply_address,
            broadcast,
        } => {
            let body = read_declared_body(reader, body_len).await?;
            let message = if broadcast {
                Message::broadcast(to_address, timeout_secs, body)
            } else {
                Message::new(to_address, reply_address, timeout_secs, body)
            };
            exchange.send(message).await?;
            Ok(())
        }
        Command::Query {
            body_len,
            timeout_secs,
            to_address,
        } => {
            let body = read_declared_body(reader, body_len).await?;
            let outcome = exchange.query(to_address, timeout_secs, body).await?;
            write_outcome(writer, outcome).await
        }
        // Quit is handled by the caller.
        Command::Quit => Ok(()),
    }
}

async fn read_declared_body<R>(reader: &mut R, body_len: usize) -> Result<bytes::Bytes, WireError>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    if body_len == 0 {
        return Ok(bytes::Bytes::new());
    }
    Ok(bytes::Bytes::from(codec::read_body(reader, body_len).await?))
}

/// Write a delivered message or the timeout frame.
async fn write_outcome<W>(writer: &mut W, outcome: Option<Message>) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    match outcome {
        Some(message) => {
            let frame = codec::encode_message_frame(
                &message.to_address,
                message.reply_address.as_deref(),
                message.timeout_secs,
                &message.body,
            );
            writer.write_all(&frame).await?;
        }
        None => writer.write_all(codec::TIMEOUT_FRAME).await?,
    }
    writer.flush().await?;
    Ok(())
}
