// src/pty/session.rs

use crate::error::{BridgeError, Result, StartupError};
use crate::path::get_default_shell;
use crate::platform::{
  set_nonblocking, set_window_size, window_size, PtyPair, ShellProcess, Termination,
};
use crate::pty::messages::{decode_client_message, encode_output, lossy_utf8, ClientMessage, Decoded};
use crate::transport::{Transport, CLOSE_INTERNAL_ERROR, CLOSE_NORMAL};
use log::{debug, error, info, warn};
use nix::unistd::Pid;
use std::fmt;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::unix::AsyncFd;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::{sleep, timeout, Duration};

/// Maximum bytes read from the PTY per output message.
pub const READ_CHUNK_SIZE: usize = 1024;
/// Upper bound on how long the output loop waits before re-checking the shell.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// How long the shell gets to honour `SIGTERM` before it is killed.
pub const TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);
/// Chunks forwarded after the shell exits. Bounds output from orphaned writers.
const MAX_TRAILING_CHUNKS: usize = 64;

/// Lifecycle of a [`Session`]. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
  Starting,
  Running,
  Closing,
  Closed,
}

/// Why a forwarding loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
  /// The transport closed.
  Closed,
  /// Unrecoverable PTY or transport error.
  Error(String),
  /// The shell exited on its own, with its exit code if it had one.
  ProcessExited(Option<i32>),
  /// Teardown started elsewhere.
  Cancelled,
}

impl fmt::Display for LoopOutcome {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      LoopOutcome::Closed => write!(f, "transport closed"),
      LoopOutcome::Error(e) => write!(f, "error: {}", e),
      LoopOutcome::ProcessExited(Some(code)) => write!(f, "shell exited with status {}", code),
      LoopOutcome::ProcessExited(None) => write!(f, "shell terminated by signal"),
      LoopOutcome::Cancelled => write!(f, "cancelled by teardown"),
    }
  }
}

/// Both PTY descriptors. Dropping this closes them.
struct PtyHandles {
  primary: AsyncFd<OwnedFd>,
  secondary: OwnedFd,
}

/// One shell bridged to one transport connection.
///
/// Created by [`Session::start`], which leaves two forwarding tasks running:
/// PTY output to the transport, and transport messages to the PTY. Whichever
/// loop ends first triggers [`Session::cleanup`]; the other sees the state
/// change and stops without touching the released handles.
pub struct Session {
  label: String,
  transport: Box<dyn Transport>,
  // Readers hold the lock only for a bounded wait; cleanup takes it exclusively to release the fds.
  pty: RwLock<Option<PtyHandles>>,
  process: Mutex<Option<ShellProcess>>,
  pid: Pid,
  pgid: Pid,
  closing: AtomicBool,
  state: watch::Sender<SessionState>,
}

impl Session {
  /// Starts a session running the host's default shell.
  ///
  /// `label` identifies the session in logs, typically the peer address.
  ///
  /// # Errors
  ///
  /// Returns the `StartupError` after closing the transport with code 1011.
  pub async fn start(
    transport: Box<dyn Transport>,
    label: impl Into<String>,
  ) -> std::result::Result<Arc<Session>, StartupError> {
    let shell = get_default_shell();
    Self::start_with_shell(transport, label, &shell).await
  }

  /// Starts a session running `shell`.
  ///
  /// Allocates the PTY, spawns the shell in its own process group on the
  /// secondary side, and launches both forwarding loops. Nothing is leaked if
  /// any step fails.
  ///
  /// # Errors
  ///
  /// Returns the `StartupError` after closing the transport with code 1011.
  pub async fn start_with_shell(
    transport: Box<dyn Transport>,
    label: impl Into<String>,
    shell: &str,
  ) -> std::result::Result<Arc<Session>, StartupError> {
    let label = label.into();
    let (state, _) = watch::channel(SessionState::Starting);

    let (handles, process) = match Self::spawn_shell(shell) {
      Ok(spawned) => spawned,
      Err(e) => {
        error!("[{}] Failed to start terminal session: {}", label, e);
        let reason = format!("Failed to start terminal: {}", e);
        if let Err(close_err) = transport.close(CLOSE_INTERNAL_ERROR, &reason).await {
          warn!("[{}] Failed to close transport: {}", label, close_err);
        }
        return Err(e);
      }
    };

    let session = Arc::new(Session {
      label,
      transport,
      pid: process.pid(),
      pgid: process.pgid(),
      pty: RwLock::new(Some(handles)),
      process: Mutex::new(Some(process)),
      closing: AtomicBool::new(false),
      state,
    });

    session.state.send_replace(SessionState::Running);
    tokio::spawn(Arc::clone(&session).run_output_loop());
    tokio::spawn(Arc::clone(&session).run_input_loop());

    info!(
      "[{}] Terminal session started with PID {}",
      session.label, session.pid
    );
    Ok(session)
  }

  fn spawn_shell(shell: &str) -> std::result::Result<(PtyHandles, ShellProcess), StartupError> {
    let pair = PtyPair::open()?;
    set_nonblocking(pair.primary.as_raw_fd()).map_err(StartupError::NonBlocking)?;
    let primary = AsyncFd::try_new(pair.primary).map_err(|e| {
      let (primary, err) = e.into_parts();
      drop(primary);
      StartupError::Registration(err)
    })?;
    let process = ShellProcess::spawn(shell, &pair.secondary)?;

    Ok((
      PtyHandles {
        primary,
        secondary: pair.secondary,
      },
      process,
    ))
  }

  pub fn label(&self) -> &str {
    &self.label
  }

  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn pgid(&self) -> Pid {
    self.pgid
  }

  pub fn state(&self) -> SessionState {
    *self.state.borrow()
  }

  /// Resolves once teardown has fully completed.
  pub async fn wait_closed(&self) {
    let mut state = self.state.subscribe();
    let _ = state.wait_for(|s| *s == SessionState::Closed).await;
  }

  /// Applies a new window size to the PTY.
  ///
  /// Values above `u16::MAX` are clamped.
  ///
  /// # Errors
  ///
  /// Returns `BridgeError::InvalidDimensions` for non-positive values, or
  /// `BridgeError::Io` if the PTY is gone or the ioctl fails.
  pub async fn resize(&self, cols: i64, rows: i64) -> Result<()> {
    if cols <= 0 || rows <= 0 {
      return Err(BridgeError::InvalidDimensions { cols, rows });
    }
    let cols = cols.min(u16::MAX as i64) as u16;
    let rows = rows.min(u16::MAX as i64) as u16;

    let guard = self.pty.read().await;
    let handles = guard.as_ref().ok_or_else(released)?;
    set_window_size(handles.secondary.as_raw_fd(), cols, rows)?;
    Ok(())
  }

  /// Current PTY geometry as `(cols, rows)`.
  pub async fn window_size(&self) -> Result<(u16, u16)> {
    let guard = self.pty.read().await;
    let handles = guard.as_ref().ok_or_else(released)?;
    Ok(window_size(handles.secondary.as_raw_fd())?)
  }

  /// Tears the session down. Idempotent and safe to call from either loop.
  ///
  /// Only the first call does anything: it stops both loops, sends `SIGTERM`
  /// to the shell's process group, escalates to `SIGKILL` after
  /// [`TERMINATION_TIMEOUT`], releases the PTY and closes the transport.
  /// Each step is attempted even if an earlier one failed.
  pub async fn cleanup(&self) {
    if self.closing.swap(true, Ordering::AcqRel) {
      debug!("[{}] Cleanup already in progress", self.label);
      return;
    }
    self.state.send_replace(SessionState::Closing);
    debug!("[{}] Cleaning up session", self.label);

    let process = self.process.lock().await.take();
    if let Some(mut process) = process {
      if let Err(e) = self.terminate_process(&mut process).await {
        error!("[{}] Error terminating process: {}", self.label, e);
      }
    }

    // Dropping the handles closes both descriptors.
    let handles = self.pty.write().await.take();
    if handles.is_some() {
      debug!("[{}] Released PTY handles", self.label);
    }
    drop(handles);

    if !self.transport.is_closed() {
      if let Err(e) = self.transport.close(CLOSE_NORMAL, "").await {
        error!("[{}] Error closing transport: {}", self.label, e);
      }
    }

    self.state.send_replace(SessionState::Closed);
    info!("[{}] Session closed", self.label);
  }

  async fn terminate_process(&self, process: &mut ShellProcess) -> Result<()> {
    match process.try_exited() {
      Ok(Some(status)) => {
        debug!("[{}] Shell already exited: {}", self.label, status);
        return Ok(());
      }
      Ok(None) => {}
      Err(e) => warn!("[{}] Failed to poll shell status: {}", self.label, e),
    }

    if let Err(e) = process.terminate(Termination::Graceful) {
      error!(
        "[{}] Failed to send SIGTERM to process group {}: {}",
        self.label,
        process.pgid(),
        e
      );
    }

    match timeout(TERMINATION_TIMEOUT, process.wait()).await {
      Ok(status) => {
        let status = status?;
        debug!("[{}] Shell exited: {}", self.label, status);
        Ok(())
      }
      Err(_) => {
        warn!(
          "[{}] {}, sending SIGKILL",
          self.label,
          BridgeError::TerminationTimeout(TERMINATION_TIMEOUT)
        );
        if let Err(e) = process.terminate(Termination::Forceful) {
          error!(
            "[{}] Failed to send SIGKILL to process group {}: {}",
            self.label,
            process.pgid(),
            e
          );
        }
        let status = process.wait().await?;
        debug!("[{}] Shell killed: {}", self.label, status);
        Ok(())
      }
    }
  }

  async fn run_output_loop(self: Arc<Self>) {
    let outcome = self.forward_pty_output().await;
    debug!("[{}] PTY output loop finished: {}", self.label, outcome);
    if let LoopOutcome::Error(ref e) = outcome {
      error!("[{}] Error reading from PTY: {}", self.label, e);
    }
    self.cleanup().await;
  }

  async fn run_input_loop(self: Arc<Self>) {
    let outcome = self.forward_client_input().await;
    debug!("[{}] Client input loop finished: {}", self.label, outcome);
    match outcome {
      LoopOutcome::Closed => info!("[{}] Connection closed by client", self.label),
      LoopOutcome::Error(ref e) => error!("[{}] Error reading from client: {}", self.label, e),
      _ => {}
    }
    self.cleanup().await;
  }

  /// PTY -> transport. Runs until the shell exits, the transport fails, or teardown begins.
  async fn forward_pty_output(&self) -> LoopOutcome {
    let mut shutdown = self.state.subscribe();
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
      if self.state() >= SessionState::Closing {
        return LoopOutcome::Cancelled;
      }
      match self.poll_exit().await {
        Ok(Some(outcome)) => {
          if let LoopOutcome::ProcessExited(_) = outcome {
            self.forward_trailing_output(&mut buf).await;
          }
          return outcome;
        }
        Ok(None) => {}
        Err(e) => return LoopOutcome::Error(e.to_string()),
      }

      let n = match self.read_primary(&mut buf).await {
        Ok(Some(0)) => {
          // Zero bytes means nothing to read right now, not end of stream.
          sleep(POLL_INTERVAL).await;
          continue;
        }
        Ok(Some(n)) => n,
        Ok(None) => continue,
        Err(e) => {
          return match self.poll_exit().await {
            Ok(Some(outcome)) => outcome,
            _ if self.state() >= SessionState::Closing => LoopOutcome::Cancelled,
            _ => LoopOutcome::Error(e.to_string()),
          };
        }
      };

      let frame = match encode_output(lossy_utf8(&buf[..n])) {
        Ok(frame) => frame,
        Err(e) => return LoopOutcome::Error(e.to_string()),
      };

      tokio::select! {
        biased;
        _ = closing(&mut shutdown) => return LoopOutcome::Cancelled,
        sent = self.transport.send(frame) => {
          if let Err(e) = sent {
            return if self.transport.is_closed() {
              LoopOutcome::Closed
            } else {
              LoopOutcome::Error(e.to_string())
            };
          }
        }
      }
    }
  }

  /// Forwards whatever the shell wrote before exiting and is still buffered on the PTY.
  async fn forward_trailing_output(&self, buf: &mut [u8]) {
    let mut shutdown = self.state.subscribe();

    for _ in 0..MAX_TRAILING_CHUNKS {
      let n = {
        let guard = self.pty.read().await;
        let Some(handles) = guard.as_ref() else {
          return;
        };
        // The primary is non-blocking; an empty buffer reads as EAGAIN.
        match read_fd(handles.primary.get_ref(), buf) {
          Ok(n) if n > 0 => n,
          _ => return,
        }
      };

      let frame = match encode_output(lossy_utf8(&buf[..n])) {
        Ok(frame) => frame,
        Err(_) => return,
      };
      tokio::select! {
        biased;
        _ = closing(&mut shutdown) => return,
        sent = self.transport.send(frame) => {
          if sent.is_err() {
            return;
          }
        }
      }
    }
    debug!("[{}] Stopped forwarding output after shell exit", self.label);
  }

  /// Transport -> PTY. Runs until the transport's message sequence ends or teardown begins.
  async fn forward_client_input(&self) -> LoopOutcome {
    let mut shutdown = self.state.subscribe();

    loop {
      let next = tokio::select! {
        biased;
        _ = closing(&mut shutdown) => return LoopOutcome::Cancelled,
        next = self.transport.recv() => next,
      };

      let payload = match next {
        None => return LoopOutcome::Closed,
        Some(Err(e)) => return LoopOutcome::Error(e.to_string()),
        Some(Ok(payload)) => payload,
      };

      tokio::select! {
        biased;
        _ = closing(&mut shutdown) => return LoopOutcome::Cancelled,
        handled = self.handle_client_payload(&payload) => {
          if let Err(e) = handled {
            return LoopOutcome::Error(e.to_string());
          }
        }
      }
    }
  }

  /// Applies one inbound payload. Only PTY write failures are returned; bad
  /// messages and failed resizes are logged and skipped.
  async fn handle_client_payload(&self, payload: &[u8]) -> Result<()> {
    match decode_client_message(payload) {
      Ok(Decoded::Message(ClientMessage::Input { data })) => self.write_primary(data.as_bytes()).await,
      Ok(Decoded::Message(ClientMessage::Resize { cols, rows })) => {
        if let Err(e) = self.resize(cols, rows).await {
          warn!("[{}] Failed to resize terminal: {}", self.label, e);
        }
        Ok(())
      }
      Ok(Decoded::Unknown(kind)) => {
        warn!("[{}] Ignoring message of unknown type {:?}", self.label, kind);
        Ok(())
      }
      Err(e) => {
        warn!("[{}] Invalid message received: {}", self.label, e);
        Ok(())
      }
    }
  }

  /// Reports the shell's exit, if it has exited. `Cancelled` if cleanup already owns it.
  async fn poll_exit(&self) -> io::Result<Option<LoopOutcome>> {
    let mut process = self.process.lock().await;
    match process.as_mut() {
      None => Ok(Some(LoopOutcome::Cancelled)),
      Some(process) => Ok(
        process
          .try_exited()?
          .map(|status| LoopOutcome::ProcessExited(status.code())),
      ),
    }
  }

  /// Waits up to [`POLL_INTERVAL`] for PTY output. `Ok(None)` if none arrived.
  async fn read_primary(&self, buf: &mut [u8]) -> Result<Option<usize>> {
    let guard = self.pty.read().await;
    let handles = guard.as_ref().ok_or_else(released)?;

    let mut ready = match timeout(POLL_INTERVAL, handles.primary.readable()).await {
      Err(_) => return Ok(None),
      Ok(ready) => ready?,
    };

    match ready.try_io(|fd| read_fd(fd.get_ref(), buf)) {
      Ok(result) => Ok(Some(result?)),
      Err(_would_block) => Ok(None),
    }
  }

  /// Writes all of `data` to the PTY primary, waiting for buffer space as needed.
  async fn write_primary(&self, data: &[u8]) -> Result<()> {
    let guard = self.pty.read().await;
    let handles = guard.as_ref().ok_or_else(released)?;

    let mut written = 0;
    while written < data.len() {
      let mut ready = handles.primary.writable().await?;
      match ready.try_io(|fd| write_fd(fd.get_ref(), &data[written..])) {
        Ok(result) => written += result?,
        Err(_would_block) => continue,
      }
    }
    debug!("[{}] Wrote {} bytes to PTY", self.label, written);
    Ok(())
  }
}

/// Resolves once the session has left `Running`.
async fn closing(state: &mut watch::Receiver<SessionState>) {
  let _ = state.wait_for(|s| *s >= SessionState::Closing).await;
}

fn released() -> io::Error {
  io::Error::new(io::ErrorKind::BrokenPipe, "PTY handles already released")
}

fn read_fd(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
  let n = unsafe {
    libc::read(
      fd.as_raw_fd(),
      buf.as_mut_ptr() as *mut libc::c_void,
      buf.len(),
    )
  };
  if n < 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(n as usize)
  }
}

fn write_fd(fd: &OwnedFd, data: &[u8]) -> io::Result<usize> {
  let n = unsafe {
    libc::write(
      fd.as_raw_fd(),
      data.as_ptr() as *const libc::c_void,
      data.len(),
    )
  };
  if n < 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(n as usize)
  }
}
