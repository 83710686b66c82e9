//! Subscribe to frequency analysis of two channels and to two kinesis
//! thoughts, print payloads for a few seconds, then unsubscribe.
//!
//! Requires `NEURO_DEVICE_ID` (or a `notion.toml` file). Set
//! `NEURO_CLOUD=true` to go through the relay instead of the local socket.
//!
//! ```bash
//! NEURO_DEVICE_ID=xxx RUST_LOG=neurosity_notion=debug cargo run --example subscriptions
//! ```

use std::time::Duration;

use futures_util::StreamExt;
use neurosity_notion::{NotionClient, NotionConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = NotionConfig::discover(None)?;
    println!("Connecting to device {}...", config.device_id);

    let client = NotionClient::new(config).await?;
    println!("Connected over {}", client.transport_kind());

    let channels = client
        .metrics()
        .channel_analysis(["FC1", "FC2"])?
        .subscribe(|payload| println!("channelAnalysis: {payload}"))
        .await?;

    // Callback form
    let push = client
        .metrics()
        .kinesis(["push", "pull"])?
        .subscribe(|payload| println!("kinesis: {payload}"))
        .await?;

    // Same logical stream, pulled as a Stream; shares the transport subscription
    let mut pull = client
        .metrics()
        .kinesis(["pull", "push"])?
        .subscribe_stream()
        .await?;
    println!("Active transport subscriptions: {}", client.active_subscriptions());

    let deadline = tokio::time::sleep(Duration::from_secs(4));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            next = pull.next() => match next {
                Some(payload) => println!("stream: {payload}"),
                None => break,
            },
        }
    }

    channels.unsubscribe().await?;
    push.unsubscribe().await?;
    pull.unsubscribe().await?;
    println!("Unsubscribed");

    client.disconnect().await?;
    Ok(())
}
