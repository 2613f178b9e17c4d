// src/platform/mod.rs

// PTYs and process groups are unix concepts; there is no fallback backend.
#[cfg(not(unix))]
compile_error!("pty-ws-bridge only supports unix targets");

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::{
  set_nonblocking, set_window_size, window_size, PtyPair, ShellProcess, Termination, DEFAULT_COLS,
  DEFAULT_ROWS,
};
