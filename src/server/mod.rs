//! Network surfaces of the bridge.
//!
//! Two listeners feed per-connection dispatchers:
//!
//! - HTTP on `--host:--http-port`: the client page at `/`, static files
//!   under `/static/`, the WebSocket endpoint at `/ws` and `/health`.
//! - A newline-delimited JSON channel on `127.0.0.1:--tcp-port` for a local
//!   companion process.
//!
//! # Example
//!
//! ```bash
//! molbridge --http-port 8000 --tcp-port 5000 --no-browser
//!
//! echo '{"id":1,"method":"version"}' | nc 127.0.0.1 5000
//! curl http://localhost:8000/health
//! ```

pub mod browser;
pub mod handlers;
pub mod tcp;
pub mod ws;

use std::future::IntoFuture;
use std::path::Path;
use std::sync::Arc;

use axum::{Router, routing::get};
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::BridgeConfig;
use crate::dispatcher::DispatcherConfig;
use crate::error::Result;

/// Shared application state.
pub struct AppState {
    /// Settings every connection's dispatcher is built from.
    pub dispatcher: DispatcherConfig,
    /// Port the HTTP listener actually bound, substituted into the page.
    pub http_port: u16,
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/ws", get(ws::upgrade))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind both listeners and serve until Ctrl+C.
pub async fn run_server(config: BridgeConfig) -> Result<()> {
    let http_listener = TcpListener::bind(config.http_addr).await?;
    let tcp_listener = TcpListener::bind(config.tcp_addr).await?;
    let http_addr = http_listener.local_addr()?;
    let tcp_addr = tcp_listener.local_addr()?;

    let dispatcher = config.dispatcher_config();
    let state = Arc::new(AppState {
        dispatcher: dispatcher.clone(),
        http_port: http_addr.port(),
    });
    let app = build_router(state, &config.static_dir);

    info!(
        http = %http_addr,
        tcp = %tcp_addr,
        workers = config.workers,
        timeout_secs = config.timeout.as_secs(),
        "molbridge listening"
    );
    eprintln!("Web UI: {}", browser::url(http_addr.port()));
    eprintln!("TCP channel: {}", tcp_addr);
    eprintln!();
    eprintln!("Press Ctrl+C to stop");

    if config.open_browser {
        browser::open(&browser::url(http_addr.port()));
    }

    tokio::select! {
        result = axum::serve(http_listener, app).into_future() => result?,
        result = tcp::serve(tcp_listener, dispatcher) => result?,
        _ = shutdown_signal() => {}
    }

    eprintln!("\nServer stopped");
    Ok(())
}

/// Completes on Ctrl+C. Never completes if the handler cannot be installed.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}
