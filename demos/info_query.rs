//! Example: Info queries and a subscription over the WebSocket transport.
//!
//! Run with: cargo run --example info_query

use hyperliquid_api_client::ws::{RequestKind, WsConfig, WsTransport};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let transport = WsTransport::connect(WsConfig::builder().testnet().build())?;

    let mids = transport
        .request(RequestKind::Info, json!({ "type": "allMids" }), None)
        .await?;
    println!("Mids: {mids}");

    let mut events = transport.events();
    transport
        .subscribe(json!({ "type": "trades", "coin": "BTC" }), None)
        .await?;
    for _ in 0..5 {
        let message = events.recv().await?;
        println!("{}: {}", message.channel, message.data);
    }

    transport.close();
    Ok(())
}
