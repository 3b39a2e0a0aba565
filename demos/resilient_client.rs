//! A reconnecting client that keeps writing through server restarts.
//!
//! Run the echo server first, then: `cargo run --example resilient_client`
//! Kill and restart the server while this runs; queued messages are
//! delivered after the client reconnects.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tether::{Client, ClientOptions, ReconnectConfig, TextCodec};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let options = ClientOptions {
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            ..ReconnectConfig::default()
        },
        queue_size: 64,
        ..ClientOptions::default()
    };

    let client = Client::new("ws://127.0.0.1:9001/", TextCodec, options);
    client.set_session_id("demo-session");

    client.on_message(|msg| println!("<- {msg}"));
    client.on_state_change(|change| {
        println!("state: {} -> {} (attempt {})", change.from, change.to, change.attempt);
    });
    client.on_disconnect(|err| println!("disconnected: {err}"));

    let cancel = CancellationToken::new();
    client.connect_with_read_loop(&cancel).await?;

    for seq in 0.. {
        let line = format!("message {seq}");
        println!("-> {line}");
        if let Err(err) = client.write(&cancel, line).await {
            println!("write failed: {err}");
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    client.close().await?;
    Ok(())
}
