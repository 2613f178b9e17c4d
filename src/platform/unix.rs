// src/platform/unix.rs

use crate::error::StartupError;
use libc::{
  ioctl, winsize, FD_CLOEXEC, F_GETFD, F_GETFL, F_SETFD, F_SETFL, O_NONBLOCK, TIOCGWINSZ, TIOCSWINSZ,
};
use log::{debug, error, info};
use nix::pty::{openpty, Winsize};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{getpgid, setsid, Pid};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};

/// Initial geometry applied to every new PTY, before the client reports its own.
pub const DEFAULT_COLS: u16 = 80;
pub const DEFAULT_ROWS: u16 = 24;

/// A freshly allocated pseudo-terminal.
///
/// The primary side is read and written by the bridge; the secondary side is
/// handed to the shell as its standard streams. Both descriptors are closed
/// when the pair is dropped, so an early return during startup never leaks them.
#[derive(Debug)]
pub struct PtyPair {
  pub primary: OwnedFd,
  pub secondary: OwnedFd,
}

impl PtyPair {
  /// Opens a new PTY pair sized to `DEFAULT_COLS` x `DEFAULT_ROWS`.
  ///
  /// # Errors
  ///
  /// Returns `StartupError::PtyAllocation` if the kernel refuses to allocate a PTY.
  pub fn open() -> Result<Self, StartupError> {
    let ws = Winsize {
      ws_row: DEFAULT_ROWS,
      ws_col: DEFAULT_COLS,
      ws_xpixel: 0,
      ws_ypixel: 0,
    };

    let pty = openpty(Some(&ws), None).map_err(|e| {
      error!("Failed to open PTY pair: {}", e);
      StartupError::PtyAllocation(io::Error::from(e))
    })?;

    // The shell only receives the dup'd stdio copies; keep the originals out of it.
    set_cloexec(pty.master.as_raw_fd()).map_err(StartupError::PtyAllocation)?;
    set_cloexec(pty.slave.as_raw_fd()).map_err(StartupError::PtyAllocation)?;

    debug!(
      "Opened PTY pair: primary_fd={}, secondary_fd={}",
      pty.master.as_raw_fd(),
      pty.slave.as_raw_fd()
    );

    Ok(PtyPair {
      primary: pty.master,
      secondary: pty.slave,
    })
  }
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
  let flags = unsafe { libc::fcntl(fd, F_GETFD) };
  if flags < 0 {
    return Err(io::Error::last_os_error());
  }
  if unsafe { libc::fcntl(fd, F_SETFD, flags | FD_CLOEXEC) } < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// Puts `fd` into non-blocking mode so reads return `WouldBlock` instead of parking the thread.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
  let flags = unsafe { libc::fcntl(fd, F_GETFL) };
  if flags < 0 {
    return Err(io::Error::last_os_error());
  }
  if unsafe { libc::fcntl(fd, F_SETFL, flags | O_NONBLOCK) } < 0 {
    return Err(io::Error::last_os_error());
  }
  Ok(())
}

/// Applies a window size to the terminal behind `fd`.
///
/// The kernel delivers `SIGWINCH` to the terminal's foreground process group
/// when the geometry actually changes.
///
/// # Errors
///
/// Returns the OS error if the `TIOCSWINSZ` ioctl fails.
pub fn set_window_size(fd: RawFd, cols: u16, rows: u16) -> io::Result<()> {
  let mut ws: winsize = unsafe { std::mem::zeroed() };
  ws.ws_col = cols;
  ws.ws_row = rows;

  let ret = unsafe { ioctl(fd, TIOCSWINSZ, &ws) };
  if ret != 0 {
    return Err(io::Error::last_os_error());
  }
  debug!("Resized PTY to cols: {}, rows: {}", cols, rows);
  Ok(())
}

/// Reads the current window size of the terminal behind `fd` as `(cols, rows)`.
pub fn window_size(fd: RawFd) -> io::Result<(u16, u16)> {
  let mut ws: winsize = unsafe { std::mem::zeroed() };
  let ret = unsafe { ioctl(fd, TIOCGWINSZ, &mut ws) };
  if ret != 0 {
    return Err(io::Error::last_os_error());
  }
  Ok((ws.ws_col, ws.ws_row))
}

/// How a process group is asked to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
  /// `SIGTERM`: the process may clean up.
  Graceful,
  /// `SIGKILL`: unconditional.
  Forceful,
}

impl Termination {
  fn signal(self) -> Signal {
    match self {
      Termination::Graceful => Signal::SIGTERM,
      Termination::Forceful => Signal::SIGKILL,
    }
  }
}

/// The shell attached to a PTY, leading its own session and process group.
#[derive(Debug)]
pub struct ShellProcess {
  child: Child,
  pid: Pid,
  pgid: Pid,
}

impl ShellProcess {
  /// Spawns `shell` with stdin, stdout and stderr all connected to `secondary`.
  ///
  /// The child calls `setsid()` before exec, so it becomes the leader of a new
  /// session and process group, and then claims the PTY as its controlling
  /// terminal. Signals sent to the group therefore reach every job the shell starts.
  ///
  /// # Errors
  ///
  /// Returns `StartupError::Spawn` if the descriptors cannot be duplicated or exec fails.
  pub fn spawn(shell: &str, secondary: &OwnedFd) -> Result<Self, StartupError> {
    let spawn_err = |source: io::Error| StartupError::Spawn {
      shell: shell.to_string(),
      source,
    };

    let stdin = secondary.try_clone().map_err(spawn_err)?;
    let stdout = secondary.try_clone().map_err(spawn_err)?;
    let stderr = secondary.try_clone().map_err(spawn_err)?;

    let mut command = Command::new(shell);
    command
      .stdin(Stdio::from(stdin))
      .stdout(Stdio::from(stdout))
      .stderr(Stdio::from(stderr))
      .kill_on_drop(false);
    if std::env::var_os("TERM").is_none() {
      command.env("TERM", "xterm-256color");
    }

    unsafe {
      command.pre_exec(|| {
        setsid().map_err(io::Error::from)?;
        // stdin is the PTY secondary at this point.
        if ioctl(libc::STDIN_FILENO, libc::TIOCSCTTY as _, 0) != 0 {
          return Err(io::Error::last_os_error());
        }
        Ok(())
      });
    }

    let child = command.spawn().map_err(|e| {
      error!("Failed to spawn shell {}: {}", shell, e);
      spawn_err(e)
    })?;

    let raw_pid = child.id().ok_or_else(|| {
      spawn_err(io::Error::new(
        io::ErrorKind::Other,
        "shell exited before its pid could be recorded",
      ))
    })?;
    let pid = Pid::from_raw(raw_pid as libc::pid_t);
    let pgid = getpgid(Some(pid)).unwrap_or(pid);

    info!("Spawned shell {} with pid {} (pgid {})", shell, pid, pgid);
    Ok(ShellProcess { child, pid, pgid })
  }

  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn pgid(&self) -> Pid {
    self.pgid
  }

  /// Non-blocking exit check. Reaps the shell if it has exited.
  pub fn try_exited(&mut self) -> io::Result<Option<ExitStatus>> {
    self.child.try_wait()
  }

  /// Signals the shell's whole process group.
  pub fn terminate(&self, how: Termination) -> nix::Result<()> {
    debug!("Sending {:?} to process group {}", how.signal(), self.pgid);
    killpg(self.pgid, how.signal())
  }

  /// Waits for the shell to exit and reaps it.
  pub async fn wait(&mut self) -> io::Result<ExitStatus> {
    self.child.wait().await
  }
}
