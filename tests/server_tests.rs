// tests/server_tests.rs
use async_trait::async_trait;
use futures::StreamExt;
use raw_socket_server::metrics::MetricsRegistry;
use raw_socket_server::server::{
    bind_tcp, start_accepting, CloseReason, ConnectionHandler, ConnectionId, ServerBuilder,
    ServerEvent, ServerHandle,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn start_server(builder: impl FnOnce(ServerBuilder) -> ServerBuilder) -> ServerHandle {
    let socket = bind_tcp(0).unwrap();
    builder(ServerBuilder::new(socket)).start().unwrap()
}

fn loopback(handle_addr: SocketAddr) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], handle_addr.port()))
}

async fn next(handle: &mut ServerHandle) -> ServerEvent {
    timeout(WAIT, handle.next_event())
        .await
        .expect("timed out waiting for event")
        .expect("event stream ended")
}

async fn expect_accepted(handle: &mut ServerHandle, client: &TcpStream) -> ConnectionId {
    match next(handle).await {
        ServerEvent::Accepted { id, address, port } => {
            assert_eq!(address, "127.0.0.1");
            assert_eq!(port, client.local_addr().unwrap().port());
            id
        }
        other => panic!("expected Accepted, got {:?}", other),
    }
}

#[tokio::test]
async fn test_accept_reports_peer_address_and_port() {
    let mut handle = start_server(|b| b);
    let client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();

    expect_accepted(&mut handle, &client).await;

    // Exactly one notification for the connection while it stays open.
    assert!(timeout(Duration::from_millis(200), handle.next_event())
        .await
        .is_err());
    handle.shutdown();
}

#[tokio::test]
async fn test_single_write_produces_one_exact_read() {
    let mut handle = start_server(|b| b.with_buffer_size(1024));
    let mut client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    let id = expect_accepted(&mut handle, &client).await;

    client.write_all(b"hello world").await.unwrap();

    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Data {
            id,
            bytes: b"hello world".to_vec(),
        }
    );

    drop(client);
    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Closed {
            id,
            reason: CloseReason::Eof,
        }
    );
}

#[tokio::test]
async fn test_separate_writes_produce_separate_reads() {
    let mut handle = start_server(|b| b);
    let mut client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    let id = expect_accepted(&mut handle, &client).await;

    client.write_all(b"first").await.unwrap();
    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Data {
            id,
            bytes: b"first".to_vec(),
        }
    );

    client.write_all(b"second").await.unwrap();
    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Data {
            id,
            bytes: b"second".to_vec(),
        }
    );
    handle.shutdown();
}

#[tokio::test]
async fn test_close_without_data_only_reports_close() {
    let mut handle = start_server(|b| b);
    let client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    let id = expect_accepted(&mut handle, &client).await;

    drop(client);

    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Closed {
            id,
            reason: CloseReason::Eof,
        }
    );

    // Server keeps accepting afterwards.
    let client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    let second = expect_accepted(&mut handle, &client).await;
    assert_ne!(second, id);
    handle.shutdown();
}

#[tokio::test]
async fn test_large_payload_arrives_in_bounded_chunks() {
    let buffer_size = 8;
    let mut handle = start_server(|b| b.with_buffer_size(buffer_size));
    let mut client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    let id = expect_accepted(&mut handle, &client).await;

    let payload: Vec<u8> = (0u8..50).collect();
    client.write_all(&payload).await.unwrap();
    drop(client);

    let mut received = Vec::new();
    loop {
        match next(&mut handle).await {
            ServerEvent::Data { id: got, bytes } => {
                assert_eq!(got, id);
                assert!(bytes.len() <= buffer_size - 1);
                received.extend(bytes);
            }
            ServerEvent::Closed { reason, .. } => {
                assert_eq!(reason, CloseReason::Eof);
                break;
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
    assert_eq!(received, payload);
}

#[tokio::test]
async fn test_two_clients_progress_independently() {
    let mut handle = start_server(|b| b);
    let addr = loopback(handle.local_addr());

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    let ports = [
        first.local_addr().unwrap().port(),
        second.local_addr().unwrap().port(),
    ];

    let mut ids_by_port = HashMap::new();
    for _ in 0..2 {
        match next(&mut handle).await {
            ServerEvent::Accepted { id, address, port } => {
                assert_eq!(address, "127.0.0.1");
                assert!(ports.contains(&port));
                ids_by_port.insert(port, id);
            }
            other => panic!("expected Accepted, got {:?}", other),
        }
    }
    assert_eq!(ids_by_port.len(), 2);

    second.write_all(b"from-second").await.unwrap();
    first.write_all(b"from-first").await.unwrap();

    let mut data = HashMap::new();
    while data.len() < 2 {
        if let ServerEvent::Data { id, bytes } = next(&mut handle).await {
            data.entry(id).or_insert_with(Vec::new).extend(bytes);
        }
    }

    assert_eq!(data[&ids_by_port[&ports[0]]], b"from-first".to_vec());
    assert_eq!(data[&ids_by_port[&ports[1]]], b"from-second".to_vec());
    handle.shutdown();
}

#[tokio::test]
async fn test_connection_limit_defers_extra_clients() {
    let mut handle = start_server(|b| b.with_max_connections(1));
    let addr = loopback(handle.local_addr());

    let first = TcpStream::connect(addr).await.unwrap();
    let first_id = expect_accepted(&mut handle, &first).await;

    // The handshake completes in the backlog, but no read loop is started.
    let second = TcpStream::connect(addr).await.unwrap();
    assert!(timeout(Duration::from_millis(200), handle.next_event())
        .await
        .is_err());

    drop(first);
    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Closed {
            id: first_id,
            reason: CloseReason::Eof,
        }
    );
    expect_accepted(&mut handle, &second).await;
    handle.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_connections_and_ends_stream() {
    let mut handle = start_server(|b| b);
    let client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    let id = expect_accepted(&mut handle, &client).await;

    handle.shutdown();

    assert_eq!(
        next(&mut handle).await,
        ServerEvent::Closed {
            id,
            reason: CloseReason::Shutdown,
        }
    );
    let end = timeout(WAIT, handle.next()).await.expect("stream did not end");
    assert!(end.is_none());
}

#[tokio::test]
async fn test_dropping_handle_stops_server_while_trigger_alive() {
    let mut handle = start_server(|b| b);
    let trigger = handle.shutdown_trigger();
    let mut client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();
    expect_accepted(&mut handle, &client).await;

    drop(handle);

    let mut buf = [0u8; 16];
    let read = timeout(WAIT, client.read(&mut buf))
        .await
        .expect("server kept the connection open after the handle was dropped");
    assert_eq!(read.unwrap(), 0);
    assert!(trigger.is_shutdown());
}

#[tokio::test]
async fn test_full_event_channel_stalls_reader() {
    let registry = MetricsRegistry::new().unwrap();
    let metrics = registry.collector();
    let mut handle = start_server(|b| {
        b.with_event_capacity(1)
            .with_buffer_size(8)
            .with_metrics(metrics.clone())
    });
    let mut client = TcpStream::connect(loopback(handle.local_addr())).await.unwrap();

    // `Accepted` takes the only slot; nothing is drained yet.
    let payload = vec![7u8; 32 * 1024 * 1024];
    let writer = tokio::spawn(async move { client.write_all(&payload).await });
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(!writer.is_finished());
    assert!(metrics.reads_total.get() <= 2);

    assert!(matches!(
        next(&mut handle).await,
        ServerEvent::Accepted { .. }
    ));
    match next(&mut handle).await {
        ServerEvent::Data { bytes, .. } => {
            assert!(!bytes.is_empty() && bytes.len() <= 7);
            assert!(bytes.iter().all(|b| *b == 7));
        }
        other => panic!("expected Data, got {:?}", other),
    }
    writer.abort();
}

#[tokio::test]
async fn test_callbacks_receive_accepts_and_reads() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let accept_tx = tx.clone();

    let socket = bind_tcp(0).unwrap();
    let server = start_accepting(
        socket,
        5,
        move |address: &str, port: u16| {
            let _ = accept_tx.send(format!("accept {address}:{port}"));
        },
        move |data: Vec<u8>| {
            let _ = tx.send(format!("read {}", String::from_utf8_lossy(&data)));
        },
    )
    .unwrap();

    let mut client = TcpStream::connect(loopback(server.local_addr())).await.unwrap();
    let client_port = client.local_addr().unwrap().port();
    client.write_all(b"ping").await.unwrap();

    let accepted = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(accepted, format!("accept 127.0.0.1:{client_port}"));
    let read = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(read, "read ping");

    server.shutdown();
    timeout(WAIT, server.finish()).await.unwrap().unwrap();
}

#[derive(Default)]
struct Tally {
    accepted: usize,
    bytes: usize,
    closed: Vec<CloseReason>,
}

#[async_trait]
impl ConnectionHandler for Tally {
    async fn on_accept(&mut self, _id: ConnectionId, _address: &str, _port: u16) {
        self.accepted += 1;
    }

    async fn on_data(&mut self, _id: ConnectionId, data: Vec<u8>) {
        self.bytes += data.len();
    }

    async fn on_close(&mut self, _id: ConnectionId, reason: &CloseReason) {
        self.closed.push(reason.clone());
    }
}

#[tokio::test]
async fn test_handler_sees_full_connection_lifecycle() {
    let handle = start_server(|b| b);
    let addr = loopback(handle.local_addr());
    let server = handle.spawn(Tally::default());

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"12345").await.unwrap();
    client.shutdown().await.unwrap();
    drop(client);

    // Give the read loop time to observe EOF before stopping the server.
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown();

    let tally = timeout(WAIT, server.finish()).await.unwrap().unwrap();
    assert_eq!(tally.accepted, 1);
    assert_eq!(tally.bytes, 5);
    assert_eq!(tally.closed, vec![CloseReason::Eof]);
}
