//! Lagoon Signal Server
//!
//! Coordinates voice/video call sessions for the Lagoon chat app and relays
//! the WebRTC negotiation handshake between browsers. Chat messaging, user
//! accounts and persistence live in their own services; this binary owns
//! only presence, live call sessions and signaling.

mod error;
mod history;
mod http;
mod presence;
mod protocol;
mod registry;
mod router;
mod users;
mod ws;

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use history::InMemoryCallHistory;
use http::AppState;
use router::SignalingRouter;
use users::InMemoryUserDirectory;

/// Lagoon Signal Server - call coordination and WebRTC signaling relay
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 4001)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Maximum archived calls kept per user
    #[arg(long, default_value_t = 100)]
    history_cap: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Starting Lagoon Signal Server...");
    info!("Port: {}", args.port);
    info!("History cap per user: {}", args.history_cap);

    let history = Arc::new(InMemoryCallHistory::new(args.history_cap));
    let users = Arc::new(InMemoryUserDirectory::new());
    let router = SignalingRouter::spawn(users, history.clone());

    let state = AppState {
        router,
        history: history as Arc<dyn history::CallHistory>,
    };
    let app = http::app(state);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on: {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
