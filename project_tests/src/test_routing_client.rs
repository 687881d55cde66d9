//! # Routing Gateway Live Subscription Test
//!
//! Connects to a running routing gateway, subscribes to one or more topics,
//! and prints every frame it receives. Useful for checking last-value
//! replay by hand: a second run right after a message should print the
//! cached value immediately.

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[command(about = "Subscribe to topics on a running routing gateway and print frames", long_about = None)]
struct Args {
    /// Gateway WebSocket URL.
    #[arg(long, default_value = "ws://127.0.0.1:8080/condors")]
    url: String,

    /// Topics to subscribe to.
    #[arg(default_values_t = vec!["prices.spx".to_string(), "trading.state".to_string()])]
    topics: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("[*] Connecting to {}", args.url);
    let (mut ws, _) = connect_async(&args.url)
        .await
        .context("Could not connect to the gateway")?;

    let subscribe = json!({ "subscribe": args.topics }).to_string();
    println!("[*] Sending: {}", subscribe);
    ws.send(Message::Text(subscribe.into())).await?;

    println!("[*] Waiting for frames (Ctrl-C to stop)...");
    while let Some(msg) = ws.next().await {
        match msg? {
            Message::Text(text) => println!("<<< {}", text),
            Message::Close(_) => {
                println!("[*] Gateway closed the connection");
                break;
            }
            _ => {}
        }
    }

    Ok(())
}
