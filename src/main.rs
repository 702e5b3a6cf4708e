use anyhow::{Context, Result};
use relay_rs::clap::Args;
use relay_rs::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();
    let config = args.load_config()?;

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("Invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.execute_command(&config)? {
        return Ok(());
    }

    info!("Starting relay-rs - OpenAI-compatible chat relay");

    let server = Server::new(&config);
    let listener = tokio::net::TcpListener::bind(&server.addr)
        .await
        .context(format!("Failed to bind {}", server.addr))?;

    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, server.router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
