//! A minimal WebSocket echo server.
//!
//! Run with: `cargo run --example echo_server`
//! Then connect any WebSocket client to ws://127.0.0.1:9001/

use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use tether::{CloseCode, ConnectionConfig, TextCodec, UpgradeOptions, Upgrader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:9001").await?;
    println!("echo server listening on ws://127.0.0.1:9001/");

    let options = UpgradeOptions {
        connection: ConnectionConfig {
            read_deadline: Duration::from_secs(300),
            ..ConnectionConfig::default()
        },
        ..UpgradeOptions::new().compression(true)
    };
    let upgrader = Upgrader::new(options);

    loop {
        let (stream, peer) = listener.accept().await?;
        let upgrader = upgrader.clone();

        tokio::spawn(async move {
            let conn = match upgrader.upgrade(stream, TextCodec).await {
                Ok(conn) => conn,
                Err(err) => {
                    eprintln!("{peer}: upgrade failed: {err}");
                    return;
                }
            };
            println!("{peer}: connected (compression: {})", conn.compression_enabled());

            let cancel = CancellationToken::new();
            loop {
                match conn.read(&cancel).await {
                    Ok(msg) => {
                        if conn.write(&cancel, &msg).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        println!("{peer}: {err}");
                        break;
                    }
                }
            }
            let _ = conn.close(CloseCode::Normal, "bye").await;
        });
    }
}
