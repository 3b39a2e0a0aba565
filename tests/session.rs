//! End-to-end sessions over real TCP: upgrade, dial, compression,
//! reconnection, and queue flushing.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether::protocol::handshake::compute_accept_key;
use tether::protocol::HandshakeRequest;
use tether::{
    Client, ClientOptions, CloseCode, ConnectionState, DialOptions, Dialer, Error, JsonCodec,
    ReconnectConfig, TextCodec, UpgradeOptions, Upgrader,
};

/// Spawn an echo server for a fixed number of connections. Each accepted
/// connection is upgraded and echoed until it closes.
async fn spawn_echo_server(options: UpgradeOptions, connections: usize) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let upgrader = Upgrader::new(options);
        for _ in 0..connections {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let upgrader = upgrader.clone();
            tokio::spawn(async move {
                let Ok(conn) = upgrader.upgrade(stream, TextCodec).await else {
                    return;
                };
                let cancel = CancellationToken::new();
                while let Ok(msg) = conn.read(&cancel).await {
                    if conn.write(&cancel, &msg).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    addr
}

#[tokio::test]
async fn test_text_roundtrip() {
    let addr = spawn_echo_server(UpgradeOptions::new(), 1).await;

    let dialer = Dialer::new(DialOptions::new().ping(Duration::ZERO, Duration::ZERO));
    let conn = dialer
        .dial(&format!("ws://{addr}/echo"), TextCodec)
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    conn.write(&cancel, &"hello world".to_string())
        .await
        .unwrap();
    let echoed = conn.read(&cancel).await.unwrap();
    assert_eq!(echoed, "hello world");

    conn.close(CloseCode::Normal, "done").await.unwrap();
}

#[tokio::test]
async fn test_json_roundtrip() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tick {
        seq: u64,
        symbol: String,
        price: f64,
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let upgrader = Upgrader::new(UpgradeOptions::new());
        let conn = upgrader
            .upgrade(stream, JsonCodec::<Tick>::new())
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let tick = conn.read(&cancel).await.unwrap();
        conn.write(&cancel, &tick).await.unwrap();
    });

    let dialer = Dialer::new(DialOptions::new());
    let conn = dialer
        .dial(&format!("ws://{addr}/ticks"), JsonCodec::<Tick>::new())
        .await
        .unwrap();

    let tick = Tick {
        seq: 7,
        symbol: "ETHUSD".into(),
        price: 1234.5,
    };
    let cancel = CancellationToken::new();
    conn.write(&cancel, &tick).await.unwrap();
    assert_eq!(conn.read(&cancel).await.unwrap(), tick);
}

#[tokio::test]
async fn test_subprotocol_negotiated_end_to_end() {
    let options = UpgradeOptions::new().subprotocols(vec!["chat".into(), "superchat".into()]);
    let addr = spawn_echo_server(options, 1).await;

    let dialer = Dialer::new(
        DialOptions::new().subprotocols(vec!["superchat".into(), "chat".into()]),
    );
    let conn = dialer
        .dial(&format!("ws://{addr}/chat"), TextCodec)
        .await
        .unwrap();

    // Client preference order wins.
    assert_eq!(conn.subprotocol(), Some("superchat"));
}

#[tokio::test]
async fn test_compression_end_to_end() {
    let options = UpgradeOptions::new().compression(true);
    let addr = spawn_echo_server(options, 1).await;

    let dialer = Dialer::new(DialOptions::new().compression(true, 64));
    let conn = dialer
        .dial(&format!("ws://{addr}/deflate"), TextCodec)
        .await
        .unwrap();
    assert!(conn.compression_enabled());

    // Well above the threshold and highly compressible.
    let message = "repetitive payload chunk ".repeat(200);
    let cancel = CancellationToken::new();
    conn.write(&cancel, &message).await.unwrap();
    assert_eq!(conn.read(&cancel).await.unwrap(), message);

    // Below the threshold: still delivered, just uncompressed.
    conn.write(&cancel, &"tiny".to_string()).await.unwrap();
    assert_eq!(conn.read(&cancel).await.unwrap(), "tiny");
}

#[tokio::test]
async fn test_compression_not_active_unless_both_sides_offer() {
    // Server does not enable compression.
    let addr = spawn_echo_server(UpgradeOptions::new(), 1).await;

    let dialer = Dialer::new(DialOptions::new().compression(true, 64));
    let conn = dialer
        .dial(&format!("ws://{addr}/plain"), TextCodec)
        .await
        .unwrap();
    assert!(!conn.compression_enabled());

    let message = "still works without deflate ".repeat(50);
    let cancel = CancellationToken::new();
    conn.write(&cancel, &message).await.unwrap();
    assert_eq!(conn.read(&cancel).await.unwrap(), message);
}

#[tokio::test]
async fn test_dial_rejects_bad_accept_key() {
    // A server that completes the handshake with a corrupted accept value.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        let request = HandshakeRequest::parse(&buf[..n]).unwrap();

        let mut accept = compute_accept_key(request.key.as_deref().unwrap());
        // Corrupt one character.
        accept.replace_range(0..1, if accept.starts_with('A') { "B" } else { "A" });

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\
             Connection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).await.unwrap();
    });

    let dialer = Dialer::new(DialOptions::new());
    let result = dialer.dial(&format!("ws://{addr}/bad"), TextCodec).await;
    assert!(matches!(result, Err(Error::InvalidHandshake(_))));
}

#[tokio::test]
async fn test_dial_rejects_non_101() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let dialer = Dialer::new(DialOptions::new());
    let result = dialer.dial(&format!("ws://{addr}/missing"), TextCodec).await;
    assert!(matches!(result, Err(Error::InvalidHandshake(_))));
}

#[tokio::test]
async fn test_client_connect_and_receive() {
    let addr = spawn_echo_server(UpgradeOptions::new(), 1).await;

    let options = ClientOptions {
        dial: DialOptions::new().ping(Duration::ZERO, Duration::ZERO),
        reconnect: ReconnectConfig::disabled(),
        ..ClientOptions::default()
    };
    let client = Client::new(format!("ws://{addr}/echo"), TextCodec, options);

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_message(move |msg: String| {
        let _ = tx.send(msg);
    });

    let cancel = CancellationToken::new();
    client.connect_with_read_loop(&cancel).await.unwrap();
    assert!(client.is_connected());

    client.write(&cancel, "ping me back".into()).await.unwrap();
    let echoed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, "ping me back");

    client.close().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_client_state_change_sequence() {
    let addr = spawn_echo_server(UpgradeOptions::new(), 1).await;

    let options = ClientOptions {
        reconnect: ReconnectConfig::disabled(),
        ..ClientOptions::default()
    };
    let client = Client::new(format!("ws://{addr}/echo"), TextCodec, options);
    client.set_session_id("it-42");

    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_state_change(move |change| {
        let _ = tx.send((change.from, change.to, change.session_id.clone()));
    });

    let cancel = CancellationToken::new();
    client.connect(&cancel).await.unwrap();
    client.close().await.unwrap();

    let mut transitions = Vec::new();
    while let Ok(t) = rx.try_recv() {
        transitions.push(t);
    }

    let expected = [
        (ConnectionState::Disconnected, ConnectionState::Connecting),
        (ConnectionState::Connecting, ConnectionState::Connected),
        (ConnectionState::Connected, ConnectionState::Closing),
        (ConnectionState::Closing, ConnectionState::Closed),
    ];
    assert_eq!(transitions.len(), expected.len());
    for ((from, to, session), (want_from, want_to)) in transitions.iter().zip(expected) {
        assert_eq!((*from, *to), (want_from, want_to));
        assert_eq!(session, "it-42");
    }
}

#[tokio::test]
async fn test_reconnect_flushes_queue_in_order() {
    // A server that drops the first session with a recoverable close code,
    // then collects what arrives on the second session.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (received_tx, mut received_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        let upgrader = Upgrader::new(UpgradeOptions::new());

        // Session one: close immediately, asking the client to retry.
        let (stream, _) = listener.accept().await.unwrap();
        let conn = upgrader.upgrade(stream, TextCodec).await.unwrap();
        conn.close(CloseCode::ServiceRestart, "restarting").await.unwrap();

        // Session two: collect messages.
        let (stream, _) = listener.accept().await.unwrap();
        let conn = upgrader.upgrade(stream, TextCodec).await.unwrap();
        let cancel = CancellationToken::new();
        while let Ok(msg) = conn.read(&cancel).await {
            let _ = received_tx.send(msg);
        }
    });

    let options = ClientOptions {
        dial: DialOptions::new().ping(Duration::ZERO, Duration::ZERO),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            jitter: false,
            ..ReconnectConfig::default()
        },
        queue_size: 16,
        queue_timeout: Duration::from_secs(10),
    };
    let client = Client::new(format!("ws://{addr}/feed"), TextCodec, options);

    let cancel = CancellationToken::new();
    client.connect_with_read_loop(&cancel).await.unwrap();

    // Wait for the server-initiated close to push the client into
    // reconnection. The first backoff delay has not elapsed yet, so the
    // writes below land in the queue.
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.state() != ConnectionState::Reconnecting {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client never entered reconnection");

    // All three writes enqueue (in call order) and resolve once flushed.
    let (a, b, c) = tokio::join!(
        client.write(&cancel, "A".into()),
        client.write(&cancel, "B".into()),
        client.write(&cancel, "C".into()),
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    for expected in ["A", "B", "C"] {
        let got = tokio::time::timeout(Duration::from_secs(5), received_rx.recv())
            .await
            .expect("server did not receive flushed message")
            .unwrap();
        assert_eq!(got, expected);
    }

    let stats = client.queue_stats();
    assert_eq!(stats.sent, 3);
    assert_eq!(stats.dropped, 0);

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_reconnect_denied_on_normal_close() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let upgrader = Upgrader::new(UpgradeOptions::new());
        let conn = upgrader.upgrade(stream, TextCodec).await.unwrap();
        // Normal closure is not recoverable: the client must stay down.
        conn.close(CloseCode::Normal, "goodbye").await.unwrap();
    });

    let options = ClientOptions {
        dial: DialOptions::new().ping(Duration::ZERO, Duration::ZERO),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(10),
            jitter: false,
            ..ReconnectConfig::default()
        },
        ..ClientOptions::default()
    };
    let client = Client::new(format!("ws://{addr}/once"), TextCodec, options);

    let (disconnect_tx, mut disconnect_rx) = mpsc::unbounded_channel();
    client.on_disconnect(move |err| {
        let _ = disconnect_tx.send(err);
    });

    let cancel = CancellationToken::new();
    client.connect_with_read_loop(&cancel).await.unwrap();

    let err = tokio::time::timeout(Duration::from_secs(5), disconnect_rx.recv())
        .await
        .unwrap()
        .unwrap();
    let close = err.as_close_error().expect("expected a typed close event");
    assert_eq!(close.code, CloseCode::Normal);
    assert_eq!(close.reason, "goodbye");

    // Give the client a moment to settle; it must not be reconnecting.
    tokio::time::timeout(Duration::from_secs(5), async {
        while client.state() != ConnectionState::Disconnected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("client kept reconnecting after a normal close");

    client.close().await.unwrap();
}

#[tokio::test]
async fn test_client_reconnect_metrics() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let upgrader = Upgrader::new(UpgradeOptions::new());
        // First session bounces, second stays up.
        let (stream, _) = listener.accept().await.unwrap();
        let conn = upgrader.upgrade(stream, TextCodec).await.unwrap();
        conn.close(CloseCode::TryAgainLater, "busy").await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let conn = upgrader.upgrade(stream, TextCodec).await.unwrap();
        let cancel = CancellationToken::new();
        let _ = conn.read(&cancel).await;
    });

    let options = ClientOptions {
        dial: DialOptions::new().ping(Duration::ZERO, Duration::ZERO),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(20),
            jitter: false,
            ..ReconnectConfig::default()
        },
        ..ClientOptions::default()
    };
    let client = Client::new(format!("ws://{addr}/busy"), TextCodec, options);

    let (connect_tx, mut connect_rx) = mpsc::unbounded_channel();
    let counter = Arc::new(std::sync::atomic::AtomicU32::new(0));
    let sink = Arc::clone(&counter);
    client.on_connect(move || {
        let n = sink.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let _ = connect_tx.send(n);
    });

    let cancel = CancellationToken::new();
    client.connect_with_read_loop(&cancel).await.unwrap();

    // Wait for the second connect (the reconnect).
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), connect_rx.recv())
            .await
            .expect("reconnect never completed")
            .unwrap();
        if n >= 2 {
            break;
        }
    }

    let metrics = client.metrics();
    assert!(metrics.reconnect_attempts >= 1);
    assert!(metrics.reconnect_successes >= 1);
    assert_eq!(metrics.reconnect_failures, 0);

    client.close().await.unwrap();
}
