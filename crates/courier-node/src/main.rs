//! # Courier Node
//!
//! The broker daemon. Constructs one exchange, binds the wire protocol
//! server on TCP or a Unix socket, optionally binds the HTTP gateway, and
//! runs until SIGINT/SIGTERM, then shuts both down through a shared watch
//! channel.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use courier_exchange::Exchange;
use courier_http::HttpGateway;
use courier_wire::WireServer;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Wire transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Unix domain socket.
    Unix,
    /// TCP socket.
    Tcp,
}

/// An in-memory, address-based message broker.
#[derive(Debug, Parser)]
#[command(name = "courier-node", version, about)]
struct Args {
    /// Wire protocol transport.
    #[arg(long, value_enum, default_value_t = Transport::Unix)]
    transport: Transport,

    /// Wire listen address: a socket path for unix, ip:port for tcp.
    /// Defaults to /tmp/courier.sock or 127.0.0.1:9813 per transport.
    #[arg(long)]
    address: Option<String>,

    /// HTTP gateway listen address (ip:port). The gateway is disabled when
    /// not given.
    #[arg(long)]
    http_address: Option<String>,

    /// Broker address HTTP request envelopes are sent to.
    #[arg(long, default_value = "courier.httpRequests")]
    http_msg_address: String,

    /// Log filter, e.g. "info" or "courier_exchange=debug".
    #[arg(long, default_value = "info")]
    log: String,
}

impl Args {
    fn wire_address(&self) -> String {
        self.address.clone().unwrap_or_else(|| match self.transport {
            Transport::Unix => "/tmp/courier.sock".to_owned(),
            Transport::Tcp => "127.0.0.1:9813".to_owned(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over the flag when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let exchange = Exchange::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let wire_address = args.wire_address();
    let wire_server = match args.transport {
        Transport::Tcp => WireServer::bind_tcp(exchange.clone(), &wire_address)
            .await
            .with_context(|| format!("failed to bind wire server on {wire_address}"))?,
        Transport::Unix => WireServer::bind_unix(exchange.clone(), &wire_address)
            .with_context(|| format!("failed to bind wire server on {wire_address}"))?,
    };
    let wire_task = tokio::spawn(wire_server.run(shutdown_rx.clone()));

    let gateway_task = match &args.http_address {
        Some(http_address) => {
            let gateway = HttpGateway::bind(exchange.clone(), http_address, &args.http_msg_address)
                .await
                .with_context(|| format!("failed to bind http gateway on {http_address}"))?;
            info!(
                envelope_address = %args.http_msg_address,
                "http requests will be routed through the broker",
            );
            Some(tokio::spawn(gateway.run(shutdown_rx.clone())))
        }
        None => None,
    };

    info!("courier node is running");
    wait_for_termination().await?;
    info!("termination signal received, shutting down");

    // Flip the shared shutdown signal and let both servers drain.
    let _ = shutdown_tx.send(true);
    let _ = wire_task.await;
    if let Some(task) = gateway_task {
        let _ = task.await;
    }

    info!("courier node stopped");
    Ok(())
}

async fn wait_for_termination() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.context("failed to listen for ctrl-c")?,
        _ = sigterm.recv() => {}
    }
    Ok(())
}
