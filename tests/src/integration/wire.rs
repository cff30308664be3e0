//! Wire protocol sessions against a live server on real sockets.

use bytes::Bytes;
use courier_exchange::Exchange;
use courier_wire::{Client, WireServer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;

async fn start_tcp_server(exchange: Exchange) -> (String, watch::Sender<bool>) {
    let server = WireServer::bind_tcp(exchange, "127.0.0.1:0").await.unwrap();
    let address = server.local_addr().unwrap().unwrap().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(server.run(shutdown_rx));
    (address, shutdown_tx)
}

#[tokio::test]
async fn send_then_ready_session() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    let mut producer = Client::connect_tcp(&address).await.unwrap();
    producer
        .send("orders", Some("order-replies"), 30, b"order #42")
        .await
        .unwrap();

    let mut consumer = Client::connect_tcp(&address).await.unwrap();
    let message = consumer.ready(30, &["orders"]).await.unwrap().unwrap();
    assert_eq!(message.to_address, "orders");
    assert_eq!(message.reply_address.as_deref(), Some("order-replies"));
    assert_eq!(message.body, Bytes::from_static(b"order #42"));

    producer.quit().await.unwrap();
    consumer.quit().await.unwrap();
}

#[tokio::test]
async fn query_round_trip_between_two_connections() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    let responder = tokio::spawn({
        let address = address.clone();
        async move {
            let mut worker = Client::connect_tcp(&address).await.unwrap();
            let request = worker.ready(30, &["uppercase"]).await.unwrap().unwrap();
            let response = request.body.iter().map(u8::to_ascii_uppercase).collect::<Vec<u8>>();
            let reply_to = request.reply_address.unwrap();
            worker.send(&reply_to, None, 30, &response).await.unwrap();
            worker.quit().await.unwrap();
        }
    });

    let mut requester = Client::connect_tcp(&address).await.unwrap();
    let reply = requester.query("uppercase", 30, b"hello").await.unwrap().unwrap();
    assert_eq!(reply.body, Bytes::from_static(b"HELLO"));

    requester.quit().await.unwrap();
    responder.await.unwrap();
}

#[tokio::test]
async fn broadcast_reaches_every_connected_waiter() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let address = address.clone();
        waiters.push(tokio::spawn(async move {
            let mut client = Client::connect_tcp(&address).await.unwrap();
            client.ready(10, &["announcements"]).await.unwrap()
        }));
    }
    // Give the ready commands time to reach the exchange.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let mut announcer = Client::connect_tcp(&address).await.unwrap();
    announcer
        .send_broadcast("announcements", 30, b"maintenance at noon")
        .await
        .unwrap();

    for waiter in waiters {
        let message = waiter.await.unwrap().expect("every waiter gets a copy");
        assert_eq!(message.body, Bytes::from_static(b"maintenance at noon"));
    }
    announcer.quit().await.unwrap();
}

#[tokio::test]
async fn ready_on_a_silent_address_times_out_with_a_frame() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    let mut client = Client::connect_tcp(&address).await.unwrap();
    let outcome = client.ready(1, &["nobody-home"]).await.unwrap();
    assert!(outcome.is_none());
    client.quit().await.unwrap();
}

#[tokio::test]
async fn malformed_command_closes_the_connection_with_an_error_frame() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    let mut stream = tokio::net::TcpStream::connect(&address).await.unwrap();
    stream.write_all(b"> not-a-length 10 inbox\r\n").await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("- "), "expected error frame, got: {text}");
    assert!(text.contains("invalid body length format"), "got: {text}");
}

#[tokio::test]
async fn oversized_declared_body_length_gets_an_error_frame() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    // The header is grammatically fine; the length itself is the violation.
    let mut stream = tokio::net::TcpStream::connect(&address).await.unwrap();
    stream
        .write_all(b"> 18446744073709551615 10 inbox\r\n")
        .await
        .unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("- "), "expected error frame, got: {text}");
    assert!(text.contains("body length exceeds maximum"), "got: {text}");
}

#[tokio::test]
async fn non_utf8_command_line_gets_an_error_frame() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    let mut stream = tokio::net::TcpStream::connect(&address).await.unwrap();
    stream.write_all(b"\xff\xfe garbage\r\n").await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("- "), "expected error frame, got: {text}");
    assert!(text.contains("utf-8"), "got: {text}");
}

#[tokio::test]
async fn other_connections_survive_a_peer_protocol_error() {
    let exchange = Exchange::new();
    let (address, _shutdown) = start_tcp_server(exchange).await;

    // A healthy waiter on one connection.
    let waiter = tokio::spawn({
        let address = address.clone();
        async move {
            let mut client = Client::connect_tcp(&address).await.unwrap();
            client.ready(10, &["survivors"]).await.unwrap()
        }
    });
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    // A misbehaving peer on another.
    let mut bad = tokio::net::TcpStream::connect(&address).await.unwrap();
    bad.write_all(b"garbage command\r\n").await.unwrap();
    let mut junk = Vec::new();
    bad.read_to_end(&mut junk).await.unwrap();

    // The healthy waiter still gets its message.
    let mut producer = Client::connect_tcp(&address).await.unwrap();
    producer.send("survivors", None, 30, b"still here").await.unwrap();
    let message = waiter.await.unwrap().unwrap();
    assert_eq!(message.body, Bytes::from_static(b"still here"));
    producer.quit().await.unwrap();
}
