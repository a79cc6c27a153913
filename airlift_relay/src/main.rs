//! Relay daemon entry point.

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use airlift_relay::{RelayState, run_server};
use airlift_relay::server::RELAY_PORT;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let addr = std::env::var("AIRLIFT_ADDR").unwrap_or_else(|_| format!("0.0.0.0:{RELAY_PORT}"));
    let listener = TcpListener::bind(&addr).await?;
    let state = Arc::new(RelayState::default());

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("ctrl-c received");
            shutdown.cancel();
        }
    });

    run_server(listener, state, Some(cancel)).await
}
