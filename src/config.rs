// src/config.rs

use clap::Parser;

/// Command-line options for the bridge server.
#[derive(Debug, Clone, Parser)]
#[command(
  name = "pty-ws-bridge",
  about = "Bridges browser terminals to a local shell over WebSocket"
)]
pub struct ServerConfig {
  /// Host to bind to.
  #[arg(long, default_value = "localhost")]
  pub host: String,

  /// Port to bind to.
  #[arg(long, default_value_t = 8765)]
  pub port: u16,

  /// Enable debug logging.
  #[arg(long)]
  pub debug: bool,
}

impl ServerConfig {
  /// `host:port`, suitable for `TcpListener::bind`.
  pub fn bind_addr(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

impl Default for ServerConfig {
  fn default() -> Self {
    ServerConfig {
      host: "localhost".to_string(),
      port: 8765,
      debug: false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let config = ServerConfig::parse_from(["pty-ws-bridge"]);
    assert_eq!(config.host, "localhost");
    assert_eq!(config.port, 8765);
    assert!(!config.debug);
    assert_eq!(config.bind_addr(), ServerConfig::default().bind_addr());
  }

  #[test]
  fn test_overrides() {
    let config =
      ServerConfig::parse_from(["pty-ws-bridge", "--host", "0.0.0.0", "--port", "9000", "--debug"]);
    assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    assert!(config.debug);
  }

  #[test]
  fn test_rejects_invalid_port() {
    assert!(ServerConfig::try_parse_from(["pty-ws-bridge", "--port", "70000"]).is_err());
  }
}
