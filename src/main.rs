use std::sync::Arc;

use chorus::config::Config;
use chorus::engine::LoopbackEngine;
use chorus::signaling::{Relay, SignalingServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chorus=info")),
        )
        .init();

    let config = Config::from_env()?;

    println!("   Chorus audio relay");
    println!("   Binding to {}", config.bind_address);
    println!("   Press Ctrl+C to stop\n");

    let relay = Relay::new(Arc::new(LoopbackEngine::new()), config.relay());
    let server = SignalingServer::new(relay, config.keepalive());

    tokio::select! {
        result = server.run(&config.bind_address) => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }
    Ok(())
}
