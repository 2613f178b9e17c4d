// src/transport/websocket.rs

use crate::error::{BridgeError, Result};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::debug;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Control frames carry at most 125 payload bytes, two of which are the close code.
const MAX_CLOSE_REASON: usize = 123;

/// [`Transport`] over an accepted WebSocket connection.
///
/// Text and binary frames are both delivered as payloads. Ping/pong are
/// answered by tungstenite itself.
pub struct WebSocketTransport<S> {
  sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
  stream: Mutex<SplitStream<WebSocketStream<S>>>,
  closed: AtomicBool,
}

impl<S> WebSocketTransport<S>
where
  S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
  pub fn new(ws: WebSocketStream<S>) -> Self {
    let (sink, stream) = ws.split();
    WebSocketTransport {
      sink: Mutex::new(sink),
      stream: Mutex::new(stream),
      closed: AtomicBool::new(false),
    }
  }
}

#[async_trait]
impl<S> Transport for WebSocketTransport<S>
where
  S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
  async fn send(&self, text: String) -> Result<()> {
    if self.is_closed() {
      return Err(BridgeError::Transport("connection already closed".to_string()));
    }
    let mut sink = self.sink.lock().await;
    sink.send(Message::Text(text.into())).await.map_err(|e| {
      self.closed.store(true, Ordering::Release);
      BridgeError::from(e)
    })
  }

  async fn recv(&self) -> Option<Result<Bytes>> {
    let mut stream = self.stream.lock().await;
    loop {
      match stream.next().await {
        Some(Ok(Message::Text(text))) => return Some(Ok(Bytes::copy_from_slice(text.as_bytes()))),
        Some(Ok(Message::Binary(data))) => return Some(Ok(data)),
        Some(Ok(Message::Close(frame))) => {
          debug!("Peer sent close frame: {:?}", frame);
          self.closed.store(true, Ordering::Release);
          return None;
        }
        // Ping, Pong and raw frames.
        Some(Ok(_)) => continue,
        Some(Err(e)) => {
          self.closed.store(true, Ordering::Release);
          return Some(Err(e.into()));
        }
        None => {
          self.closed.store(true, Ordering::Release);
          return None;
        }
      }
    }
  }

  async fn close(&self, code: u16, reason: &str) -> Result<()> {
    if self.closed.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let frame = CloseFrame {
      code: CloseCode::from(code),
      reason: truncate_reason(reason).to_string().into(),
    };
    let mut sink = self.sink.lock().await;
    sink.send(Message::Close(Some(frame))).await?;
    Ok(())
  }

  fn is_closed(&self) -> bool {
    self.closed.load(Ordering::Acquire)
  }
}

/// Cuts `reason` to fit a close frame without splitting a character.
fn truncate_reason(reason: &str) -> &str {
  if reason.len() <= MAX_CLOSE_REASON {
    return reason;
  }
  let mut end = MAX_CLOSE_REASON;
  while !reason.is_char_boundary(end) {
    end -= 1;
  }
  &reason[..end]
}
