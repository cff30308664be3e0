//! # HTTP Gateway Server
//!
//! The axum surface and the relay logic: envelope out, reply head back,
//! body chunks streamed until an empty chunk. All waits are bounded by
//! [`HTTP_RELAY_TIMEOUT_SECS`].

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use bytes::Bytes;
use courier_exchange::{Exchange, Message};
use futures::Stream;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::envelope::{parse_reply_head, RequestEnvelope};
use crate::error::GatewayError;

/// Bounded wait for the reply head and for each streamed body chunk.
pub const HTTP_RELAY_TIMEOUT_SECS: u64 = 180;

/// Shared handler state: the exchange and the address workers listen on.
#[derive(Clone)]
struct GatewayState {
    exchange: Exchange,
    to_address: String,
}

/// A bound HTTP gateway. Construct with [`HttpGateway::bind`], then drive it
/// with [`HttpGateway::run`].
pub struct HttpGateway {
    listener: TcpListener,
    router: Router,
}

impl HttpGateway {
    /// Bind the gateway's TCP listener. `to_address` is the broker address
    /// request envelopes are sent to.
    ///
    /// # Errors
    ///
    /// Propagates the bind failure.
    pub async fn bind(
        exchange: Exchange,
        address: &str,
        to_address: impl Into<String>,
    ) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, "http gateway listening");

        let state = GatewayState {
            exchange,
            to_address: to_address.into(),
        };
        let router = Router::new()
            .fallback(relay)
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        Ok(Self { listener, router })
    }

    /// The bound address. Useful with port 0.
    ///
    /// # Errors
    ///
    /// Propagates the socket introspection failure.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, std::io::Error> {
        self.listener.local_addr()
    }

    /// Serve until the shutdown signal flips.
    ///
    /// # Errors
    ///
    /// Returns only on a fatal serve failure.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), std::io::Error> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
                info!("http gateway shutting down");
            })
            .await
    }
}

/// Handle one HTTP request of any method and path.
async fn relay(State(state): State<GatewayState>, request: Request<Body>) -> Response {
    match relay_request(&state, request).await {
        Ok(response) => response,
        Err(error) => {
            warn!(%error, "relay failed");
            error_response(&error)
        }
    }
}

/// Envelope the request, hand it to the broker, translate the reply.
async fn relay_request(
    state: &GatewayState,
    request: Request<Body>,
) -> Result<Response, GatewayError> {
    let body_addr = state.exchange.reserve_address().await?;
    let reply_addr = state.exchange.reserve_address().await?;

    let envelope = RequestEnvelope {
        method: request.method().to_string(),
        url: request.uri().to_string(),
        protocol: format!("{:?}", request.version()),
        headers: request
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_owned()))
            })
            .collect(),
        body_addr: body_addr.clone(),
    };
    let envelope_json = serde_json::to_vec(&envelope)
        .map_err(|e| GatewayError::BadReply(format!("envelope encoding failed: {e}")))?;

    let request_body = axum::body::to_bytes(request.into_body(), usize::MAX)
        .await
        .map_err(|e| GatewayError::RequestBody(e.to_string()))?;

    debug!(
        method = %envelope.method,
        url = %envelope.url,
        body_bytes = request_body.len(),
        "relaying request",
    );

    state
        .exchange
        .send(
            Message::new(
                state.to_address.clone(),
                None,
                HTTP_RELAY_TIMEOUT_SECS,
                Bytes::from(envelope_json),
            )
            .with_reply_address(reply_addr.clone()),
        )
        .await?;
    state
        .exchange
        .send(Message::new(
            body_addr,
            None,
            HTTP_RELAY_TIMEOUT_SECS,
            request_body,
        ))
        .await?;

    let reply = state
        .exchange
        .ready(vec![reply_addr.clone()], HTTP_RELAY_TIMEOUT_SECS)
        .await?
        .ok_or(GatewayError::ReplyTimeout)?;

    build_response(state.exchange.clone(), reply_addr, &reply.body)
}

/// Build the HTTP response from the reply head, with the body streamed from
/// follow-up messages on the reply address.
fn build_response(
    exchange: Exchange,
    reply_addr: String,
    head_json: &[u8],
) -> Result<Response, GatewayError> {
    let head = parse_reply_head(head_json)?;

    let mut builder = Response::builder().status(head.status);
    for (name, value) in &head.headers {
        // Hop-by-hop headers are the gateway's business, not the worker's.
        if name.eq_ignore_ascii_case("connection") {
            continue;
        }
        builder = builder.header(name, value);
    }

    builder
        .body(Body::from_stream(chunk_stream(exchange, reply_addr)))
        .map_err(|e| GatewayError::BadReply(format!("invalid reply header: {e}")))
}

/// Yield body chunks delivered to `address` until an empty chunk ends the
/// stream. A timeout mid-stream aborts the response.
fn chunk_stream(
    exchange: Exchange,
    address: String,
) -> impl Stream<Item = Result<Bytes, GatewayError>> {
    futures::stream::unfold(Some((exchange, address)), |state| async move {
        let (exchange, address) = state?;
        match exchange
            .ready(vec![address.clone()], HTTP_RELAY_TIMEOUT_SECS)
            .await
        {
            Ok(Some(message)) if message.body.is_empty() => None,
            Ok(Some(message)) => Some((Ok(message.body), Some((exchange, address)))),
            Ok(None) => Some((Err(GatewayError::StreamTimeout), None)),
            Err(error) => Some((Err(GatewayError::Exchange(error)), None)),
        }
    })
}

/// The explicit error page: timeouts are 504, bad worker replies 502,
/// everything else 500.
fn error_response(error: &GatewayError) -> Response {
    let status = match error {
        GatewayError::ReplyTimeout | GatewayError::StreamTimeout => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::BadReply(_) => StatusCode::BAD_GATEWAY,
        GatewayError::RequestBody(_) => StatusCode::BAD_REQUEST,
        GatewayError::Exchange(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        [(header::CONTENT_TYPE, "text/plain")],
        format!("an error has occurred\n{error}\n"),
    )
        .into_response()
}
