use std::time::Duration;

use overworld::config::parse_cli_args;
use overworld::server;
use overworld::shutdown::{self, shutdown_channel};

#[tokio::main]
async fn main() {
    observability::init_logging();

    let config = parse_cli_args();
    tracing::info!("Overworld server starting...");

    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let running = match server::bind_and_start(config, shutdown_rx).await {
        Ok(running) => running,
        Err(e) => {
            tracing::error!("Failed to start server: {}", e);
            std::process::exit(1);
        }
    };

    shutdown::wait_for_signal().await;
    tracing::info!("Shutdown signal received, stopping server...");
    shutdown_tx.trigger();

    if tokio::time::timeout(Duration::from_secs(5), running.join())
        .await
        .is_err()
    {
        tracing::warn!("Server did not stop within 5s, exiting anyway");
    }

    tracing::info!("Server stopped.");
}
