// src/error.rs

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Failures while bringing a session up. Fatal to that session only.
#[derive(Debug, Error)]
pub enum StartupError {
  #[error("failed to allocate PTY pair: {0}")]
  PtyAllocation(#[source] io::Error),

  #[error("failed to spawn shell {shell}: {source}")]
  Spawn {
    shell: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to switch PTY primary to non-blocking mode: {0}")]
  NonBlocking(#[source] io::Error),

  #[error("failed to register PTY primary with the runtime: {0}")]
  Registration(#[source] io::Error),
}

/// Errors raised inside a running bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
  #[error(transparent)]
  Startup(#[from] StartupError),

  /// Inbound payload could not be decoded. The message is skipped.
  #[error("malformed client message: {0}")]
  Decode(String),

  #[error("PTY I/O error: {0}")]
  Io(#[from] io::Error),

  #[error("transport error: {0}")]
  Transport(String),

  #[error("process did not exit within {0:?} of a graceful termination request")]
  TerminationTimeout(Duration),

  #[error("invalid terminal dimensions {cols}x{rows}")]
  InvalidDimensions { cols: i64, rows: i64 },
}

impl From<serde_json::Error> for BridgeError {
  fn from(err: serde_json::Error) -> Self {
    BridgeError::Decode(err.to_string())
  }
}

impl From<tokio_tungstenite::tungstenite::Error> for BridgeError {
  fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
    BridgeError::Transport(err.to_string())
  }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
