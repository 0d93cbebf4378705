//! Notesync Server
//!
//! A minimal in-memory note service that `notesync` clients poll and push to.
//! Notes are kept verbatim, versions included, and are lost on restart.
//!
//! # Configuration
//!
//! Environment variables:
//! - `NOTESYNC_PORT`: Port to listen on (default: 8080)
//! - `RUST_LOG`: Log filter (default: `notesync_server=info,tower_http=info`)
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /notes/{title}`: Fetch a note (404 if absent)
//! - `PUT /notes/{title}`: Store `{"content": ..., "version": ...}` as-is
//! - `DELETE /notes/{title}`: Remove a note

use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notesync::server::{router, NoteServerState};

const DEFAULT_PORT: u16 = 8080;

fn port_from_env() -> u16 {
    std::env::var("NOTESYNC_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notesync_server=info,notesync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = serve(port_from_env()).await {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}

async fn serve(port: u16) -> std::io::Result<()> {
    let app = router(NoteServerState::default()).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}
