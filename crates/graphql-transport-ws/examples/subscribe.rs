//! Subscription Example
//!
//! Subscribes to a GraphQL subscription and prints every result until the
//! server completes it or Ctrl-C is pressed.
//!
//! Run with:
//! `cargo run -p graphql-transport-ws --example subscribe -- ws://localhost:4000/graphql "subscription { greetings }"`

use futures_util::StreamExt;
use graphql_transport_ws::{Client, ClientConfig, OperationEvent, SubscribePayload};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args
        .next()
        .unwrap_or_else(|| "ws://localhost:4000/graphql".to_string());
    let query = args
        .next()
        .unwrap_or_else(|| "subscription { greetings }".to_string());

    let config = ClientConfig::new(url)
        .on_error(|e| tracing::error!(error = %e, "client stopped"));
    let client = Client::new(config)?;
    client.on_connected(|ack| tracing::info!(?ack, "connected"));
    client.on_closed(|event| tracing::info!(%event, "socket closed"));

    let (_subscription, mut events) = client.subscribe_stream(SubscribePayload::new(query))?;

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(OperationEvent::Next { payload, .. }) => {
                    println!("{}", serde_json::Value::Object(payload));
                }
                Some(OperationEvent::Error { errors, .. }) => {
                    for error in errors {
                        eprintln!("error: {}", error.message);
                    }
                }
                Some(OperationEvent::Complete { .. }) | None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.dispose().await?;
    Ok(())
}
