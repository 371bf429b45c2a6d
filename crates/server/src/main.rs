//! Binary entry point for the bookshelf server.

use bookshelf_server::{app, config::ServerConfig, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bookshelf_server=info,bookshelf_core=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env();
    let state = AppState::new(config)?;
    tracing::info!("Data directory: {}", state.config.data_dir.display());

    let router = app(state.clone()).layer(tower_http::cors::CorsLayer::permissive());

    let addr = state.config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Bookshelf server listening on {}", addr);
    axum::serve(listener, router).await?;
    Ok(())
}
