// src/worker/listener.rs

use crate::error::Result;
use crate::pty::session::Session;
use crate::transport::WebSocketTransport;
use log::{debug, error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_tungstenite::accept_async;

/// Accepts WebSocket clients and gives each one its own [`Session`].
///
/// Sessions run on their own tasks; a failing session never takes the
/// listener or any other session down with it.
pub struct Listener {
  listener: TcpListener,
  shell: Option<String>,
}

impl Listener {
  /// Binds to `addr` (`host:port`).
  ///
  /// # Errors
  ///
  /// Returns `BridgeError::Io` if the address cannot be bound.
  pub async fn bind(addr: &str) -> Result<Self> {
    let listener = TcpListener::bind(addr).await?;
    debug!("Bound listener to {}", listener.local_addr()?);
    Ok(Listener {
      listener,
      shell: None,
    })
  }

  /// Runs `shell` in every session instead of the host's default shell.
  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  pub fn local_addr(&self) -> Result<SocketAddr> {
    Ok(self.listener.local_addr()?)
  }

  /// Accepts connections until `shutdown` resolves, then tears down every
  /// live session and waits for its cleanup before returning.
  pub async fn run_until<F>(self, shutdown: F) -> Result<()>
  where
    F: Future<Output = ()>,
  {
    let (stop_tx, stop_rx) = watch::channel(false);
    let mut connections = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        _ = &mut shutdown => break,
        accepted = self.listener.accept() => match accepted {
          Ok((stream, peer)) => {
            let shell = self.shell.clone();
            connections.spawn(handle_connection(stream, peer, shell, stop_rx.clone()));
          }
          Err(e) => warn!("TCP accept error: {}", e),
        },
        Some(joined) = connections.join_next(), if !connections.is_empty() => {
          if let Err(e) = joined {
            error!("Connection task failed: {}", e);
          }
        }
      }
    }

    info!(
      "Listener stopped accepting connections, closing {} open connection(s)",
      connections.len()
    );
    stop_tx.send_replace(true);
    while let Some(joined) = connections.join_next().await {
      if let Err(e) = joined {
        error!("Connection task failed: {}", e);
      }
    }
    Ok(())
  }
}

/// Serves one client from handshake to teardown.
async fn handle_connection(
  stream: TcpStream,
  peer: SocketAddr,
  shell: Option<String>,
  mut stop: watch::Receiver<bool>,
) {
  info!("New connection from {}", peer);

  let handshake = tokio::select! {
    _ = stopping(&mut stop) => {
      info!("Dropped connection from {} during shutdown", peer);
      return;
    }
    handshake = accept_async(stream) => handshake,
  };

  match handshake {
    Ok(ws) => {
      let transport = Box::new(WebSocketTransport::new(ws));
      let started = match shell {
        Some(shell) => Session::start_with_shell(transport, peer.to_string(), &shell).await,
        None => Session::start(transport, peer.to_string()).await,
      };
      match started {
        Ok(session) => {
          tokio::select! {
            _ = session.wait_closed() => {}
            _ = stopping(&mut stop) => {
              session.cleanup().await;
              // A forwarding loop may have started cleanup first.
              session.wait_closed().await;
            }
          }
        }
        Err(e) => error!("Error handling connection from {}: {}", peer, e),
      }
    }
    Err(e) => warn!("WebSocket handshake with {} failed: {}", peer, e),
  }

  info!("Connection from {} closed", peer);
}

/// Resolves once the listener is shutting down.
async fn stopping(stop: &mut watch::Receiver<bool>) {
  let _ = stop.wait_for(|stopped| *stopped).await;
}
