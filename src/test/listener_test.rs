// src/test/listener_test.rs

use crate::utils::logging::initialize_logging;
use crate::worker::Listener;
use futures::{SinkExt, StreamExt};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serial_test::serial;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(15);

async fn start_listener(shell: &str) -> (String, oneshot::Sender<()>) {
  let (url, stop, _server) = serve(shell).await;
  (url, stop)
}

async fn serve(shell: &str) -> (String, oneshot::Sender<()>, JoinHandle<crate::error::Result<()>>) {
  initialize_logging(true);
  let listener = Listener::bind("127.0.0.1:0")
    .await
    .expect("Failed to bind listener")
    .with_shell(shell);
  let url = format!("ws://{}", listener.local_addr().unwrap());
  let (stop_tx, stop_rx) = oneshot::channel();
  let server = tokio::spawn(listener.run_until(async {
    let _ = stop_rx.await;
  }));
  (url, stop_tx, server)
}

#[tokio::test]
#[serial]
async fn test_websocket_client_drives_a_shell() {
  let (url, _stop) = start_listener("/bin/cat").await;
  let (mut ws, _) = connect_async(url.as_str()).await.expect("Failed to connect");

  ws.send(Message::Text(
    r#"{"type":"resize","cols":100,"rows":30}"#.to_string().into(),
  ))
  .await
  .unwrap();
  ws.send(Message::Text(r#"{"type":"input","data":"over the wire\n"}"#.to_string().into()))
    .await
    .unwrap();

  let deadline = Instant::now() + READ_TIMEOUT;
  let mut output = String::new();
  while !output.contains("over the wire") {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let frame = timeout(remaining, ws.next())
      .await
      .expect("no output before timeout")
      .expect("connection ended")
      .expect("websocket error");
    if let Message::Text(text) = frame {
      let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
      assert_eq!(value["type"], "output");
      output.push_str(value["data"].as_str().unwrap());
    }
  }

  let _ = ws.close(None).await;
}

#[tokio::test]
#[serial]
async fn test_startup_failure_is_reported_in_close_frame() {
  let (url, _stop) = start_listener("/no/such/shell").await;
  let (mut ws, _) = connect_async(url.as_str()).await.expect("Failed to connect");

  let frame = timeout(READ_TIMEOUT, ws.next())
    .await
    .expect("no close frame before timeout")
    .expect("connection ended without close frame")
    .expect("websocket error");

  match frame {
    Message::Close(Some(close)) => {
      assert_eq!(close.code, CloseCode::Error);
      assert!(close.reason.as_str().starts_with("Failed to start terminal:"));
    }
    other => panic!("expected close frame, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_shell_exit_closes_the_connection() {
  let (url, _stop) = start_listener("/bin/sh").await;
  let (mut ws, _) = connect_async(url.as_str()).await.expect("Failed to connect");

  ws.send(Message::Text(r#"{"type":"input","data":"exit\n"}"#.to_string().into()))
    .await
    .unwrap();

  let deadline = Instant::now() + READ_TIMEOUT;
  loop {
    let remaining = deadline.saturating_duration_since(Instant::now());
    match timeout(remaining, ws.next()).await.expect("connection stayed open") {
      Some(Ok(Message::Close(Some(close)))) => {
        assert_eq!(close.code, CloseCode::Normal);
        break;
      }
      Some(Ok(Message::Close(None))) | None | Some(Err(_)) => break,
      Some(Ok(_)) => continue,
    }
  }
}

#[tokio::test]
#[serial]
async fn test_long_startup_diagnostic_still_closes_cleanly() {
  let shell = format!("/opt/{}/bin/zsh", "a".repeat(80));
  let (url, _stop) = start_listener(&shell).await;
  let (mut ws, _) = connect_async(url.as_str()).await.expect("Failed to connect");

  let frame = timeout(READ_TIMEOUT, ws.next())
    .await
    .expect("no close frame before timeout")
    .expect("connection ended without close frame")
    .expect("websocket error");

  match frame {
    Message::Close(Some(close)) => {
      assert_eq!(close.code, CloseCode::Error);
      assert!(close.reason.as_str().starts_with("Failed to start terminal:"));
      assert!(close.reason.len() <= 123);
    }
    other => panic!("expected close frame, got {:?}", other),
  }
}

#[tokio::test]
#[serial]
async fn test_shutdown_tears_down_live_sessions() {
  let (url, stop, server) = serve("/bin/sh").await;
  let (mut ws, _) = connect_async(url.as_str()).await.expect("Failed to connect");

  // The quotes keep the terminal's echo of this line from matching.
  ws.send(Message::Text(r#"{"type":"input","data":"echo pi''d=$$.\n"}"#.to_string().into()))
    .await
    .unwrap();

  let deadline = Instant::now() + READ_TIMEOUT;
  let mut output = String::new();
  let pid = loop {
    if let Some(start) = output.find("pid=") {
      if let Some(len) = output[start + 4..].find('.') {
        if let Ok(pid) = output[start + 4..start + 4 + len].parse::<i32>() {
          break Pid::from_raw(pid);
        }
      }
    }
    let remaining = deadline.saturating_duration_since(Instant::now());
    let frame = timeout(remaining, ws.next())
      .await
      .expect("no pid before timeout")
      .expect("connection ended")
      .expect("websocket error");
    if let Message::Text(text) = frame {
      let value: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
      output.push_str(value["data"].as_str().unwrap());
    }
  };
  assert!(kill(pid, None).is_ok(), "shell should be running");

  stop.send(()).unwrap();

  let mut close_code = None;
  while close_code.is_none() {
    match timeout(SHUTDOWN_TIMEOUT, ws.next()).await.expect("connection stayed open") {
      Some(Ok(Message::Close(Some(close)))) => close_code = Some(close.code),
      Some(Ok(_)) => continue,
      other => panic!("expected close frame, got {:?}", other),
    }
  }
  assert_eq!(close_code, Some(CloseCode::Normal));

  timeout(SHUTDOWN_TIMEOUT, server)
    .await
    .expect("listener did not finish shutting down")
    .expect("listener task panicked")
    .expect("listener failed");
  assert_eq!(kill(pid, None), Err(Errno::ESRCH));
}
