//! HTTP gateway round trips: a real client on one side, a broker worker on
//! the other.

use bytes::Bytes;
use courier_exchange::{Exchange, Message};
use courier_http::{HttpGateway, RequestEnvelope};
use tokio::sync::watch;

const WORKER_ADDRESS: &str = "http.requests";

async fn start_gateway(exchange: Exchange) -> (String, watch::Sender<bool>) {
    let gateway = HttpGateway::bind(exchange, "127.0.0.1:0", WORKER_ADDRESS)
        .await
        .unwrap();
    let base_url = format!("http://{}", gateway.local_addr().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(gateway.run(shutdown_rx));
    (base_url, shutdown_tx)
}

/// Service one envelope: drain the request body, then reply with the given
/// head and body chunks followed by the empty terminator.
async fn serve_one(
    exchange: &Exchange,
    head: &'static str,
    chunks: &[&'static str],
) -> (RequestEnvelope, Bytes) {
    let envelope_msg = exchange
        .ready(vec![WORKER_ADDRESS.into()], 30)
        .await
        .unwrap()
        .expect("envelope should arrive");
    let envelope: RequestEnvelope = serde_json::from_slice(&envelope_msg.body).unwrap();

    let request_body = exchange
        .ready(vec![envelope.body_addr.clone()], 30)
        .await
        .unwrap()
        .expect("request body should arrive")
        .body;

    let reply_to = envelope_msg.reply_address.unwrap();
    exchange
        .send(Message::new(
            reply_to.clone(),
            None,
            30,
            Bytes::from_static(head.as_bytes()),
        ))
        .await
        .unwrap();
    for chunk in chunks {
        exchange
            .send(Message::new(
                reply_to.clone(),
                None,
                30,
                Bytes::from_static(chunk.as_bytes()),
            ))
            .await
            .unwrap();
    }
    exchange
        .send(Message::new(reply_to, None, 30, Bytes::new()))
        .await
        .unwrap();

    (envelope, request_body)
}

#[tokio::test]
async fn get_request_is_enveloped_and_answered() {
    let exchange = Exchange::new();
    let (base_url, _shutdown) = start_gateway(exchange.clone()).await;

    let worker = tokio::spawn({
        let exchange = exchange.clone();
        async move {
            serve_one(
                &exchange,
                r#"["200", ["Content-Type", "application/json"]]"#,
                &[r#"{"ok":true}"#],
            )
            .await
        }
    });

    let response = reqwest::get(format!("{base_url}/status?verbose=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "application/json"
    );
    assert_eq!(response.text().await.unwrap(), r#"{"ok":true}"#);

    let (envelope, request_body) = worker.await.unwrap();
    assert_eq!(envelope.method, "GET");
    assert_eq!(envelope.url, "/status?verbose=1");
    assert!(request_body.is_empty());
}

#[tokio::test]
async fn post_body_is_delivered_to_the_body_address() {
    let exchange = Exchange::new();
    let (base_url, _shutdown) = start_gateway(exchange.clone()).await;

    let worker = tokio::spawn({
        let exchange = exchange.clone();
        async move { serve_one(&exchange, r#"["201", []]"#, &["created"]).await }
    });

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{base_url}/orders"))
        .body("order payload")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);
    assert_eq!(response.text().await.unwrap(), "created");

    let (envelope, request_body) = worker.await.unwrap();
    assert_eq!(envelope.method, "POST");
    assert_eq!(request_body, Bytes::from_static(b"order payload"));
}

#[tokio::test]
async fn multi_chunk_reply_body_arrives_in_order() {
    let exchange = Exchange::new();
    let (base_url, _shutdown) = start_gateway(exchange.clone()).await;

    let worker = tokio::spawn({
        let exchange = exchange.clone();
        async move {
            serve_one(
                &exchange,
                r#"["200", ["Content-Type", "text/plain"]]"#,
                &["first ", "second ", "third"],
            )
            .await
        }
    });

    let response = reqwest::get(format!("{base_url}/chunked")).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "first second third");
    worker.await.unwrap();
}

#[tokio::test]
async fn worker_error_status_passes_through_untouched() {
    let exchange = Exchange::new();
    let (base_url, _shutdown) = start_gateway(exchange.clone()).await;

    let worker = tokio::spawn({
        let exchange = exchange.clone();
        async move { serve_one(&exchange, r#"["404", []]"#, &["no such page"]).await }
    });

    let response = reqwest::get(format!("{base_url}/missing")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    assert_eq!(response.text().await.unwrap(), "no such page");
    worker.await.unwrap();
}
