use clap::Parser;
use std::net::SocketAddr;
use tokio::signal::{self, ctrl_c};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use learning_hub::{
    app,
    blob::MemoryBlobStore,
    config::Args,
    state::AppState,
    store::MemoryDocumentStore,
};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let store = MemoryDocumentStore::new();
    let blobs = MemoryBlobStore::new(&args.public_base_url);
    let state = AppState::new(args.clone(), store, blobs);

    let router = app(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();

    info!("Catalog running on http://localhost:{}", args.port);
    info!("Products: {}", args.products);
    info!(
        "Rate limit: {} requests per {} seconds per client",
        args.rate_limit, args.rate_window
    );
    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    info!("Server shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        ctrl_c().await.expect("Failed to install Ctrl+C handler");
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
