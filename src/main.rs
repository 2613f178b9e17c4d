// src/main.rs

use clap::Parser;
use log::{error, info};
use pty_ws_bridge::utils::logging::initialize_logging;
use pty_ws_bridge::{BridgeError, Listener, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), BridgeError> {
  let config = ServerConfig::parse();
  initialize_logging(config.debug);

  let addr = config.bind_addr();
  info!("Terminal server starting on ws://{}", addr);

  let listener = Listener::bind(&addr).await.map_err(|e| {
    error!("Server error: {}", e);
    e
  })?;
  info!("Press Ctrl+C to stop the server");

  listener
    .run_until(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
      }
      info!("Shutting down server...");
    })
    .await
}
