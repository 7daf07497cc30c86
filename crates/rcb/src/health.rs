//! Liveness endpoint for hosting platforms that probe an HTTP port.

use axum::{http::StatusCode, routing::get, Router};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub const BANNER: &str = "Session Login Bot is running!";

pub fn router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

pub async fn spawn(port: u16, shutdown: CancellationToken) -> std::io::Result<()> {
    let address = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(bind_address = %address, "health endpoint started");

    tokio::spawn(async move {
        let server = axum::serve(listener, router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = server.await {
            error!(error = %e, "health endpoint server terminated unexpectedly");
        }
    });

    Ok(())
}

async fn index() -> &'static str {
    BANNER
}

pub async fn health() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
