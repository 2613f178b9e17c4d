// src/transport/mod.rs

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

pub mod websocket;

pub use websocket::WebSocketTransport;

/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used when the session could not be started.
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// A message-oriented connection to one remote terminal client.
///
/// The session's two forwarding loops use it concurrently: one only sends,
/// the other only receives. Implementations must tolerate that.
#[async_trait]
pub trait Transport: Send + Sync {
  /// Sends one text message.
  async fn send(&self, text: String) -> Result<()>;

  /// Waits for the next application payload.
  ///
  /// Returns `None` once the connection has been closed by either side;
  /// control frames never surface here.
  async fn recv(&self) -> Option<Result<Bytes>>;

  /// Closes the connection with `code` and a textual `reason`. A no-op if already closed.
  async fn close(&self, code: u16, reason: &str) -> Result<()>;

  fn is_closed(&self) -> bool;
}
