// src/test/platform_test.rs

use crate::platform::{
  set_window_size, window_size, PtyPair, ShellProcess, Termination, DEFAULT_COLS, DEFAULT_ROWS,
};
use nix::errno::Errno;
use nix::sys::signal::kill;
use serial_test::serial;
use std::os::fd::AsRawFd;
use tokio::time::{timeout, Duration};

#[test]
#[serial]
fn test_open_pty_pair() {
  let pair = PtyPair::open().expect("Failed to open PTY pair");
  assert!(pair.primary.as_raw_fd() >= 0, "Invalid primary fd");
  assert!(pair.secondary.as_raw_fd() >= 0, "Invalid secondary fd");
  assert_ne!(pair.primary.as_raw_fd(), pair.secondary.as_raw_fd());

  let size = window_size(pair.secondary.as_raw_fd()).expect("TIOCGWINSZ failed");
  assert_eq!(size, (DEFAULT_COLS, DEFAULT_ROWS));
}

#[test]
#[serial]
fn test_window_size_is_shared_by_both_sides() {
  let pair = PtyPair::open().expect("Failed to open PTY pair");
  set_window_size(pair.secondary.as_raw_fd(), 132, 43).expect("TIOCSWINSZ failed");

  assert_eq!(window_size(pair.secondary.as_raw_fd()).unwrap(), (132, 43));
  assert_eq!(window_size(pair.primary.as_raw_fd()).unwrap(), (132, 43));
}

#[tokio::test]
#[serial]
async fn test_shell_leads_its_own_process_group() {
  let pair = PtyPair::open().expect("Failed to open PTY pair");
  let mut shell = ShellProcess::spawn("/bin/cat", &pair.secondary).expect("Failed to spawn");

  assert!(shell.pid().as_raw() > 0, "Invalid pid");
  assert_eq!(shell.pgid(), shell.pid());
  assert_ne!(shell.pgid(), nix::unistd::getpgrp());
  assert!(shell.try_exited().unwrap().is_none());

  shell.terminate(Termination::Graceful).expect("SIGTERM failed");
  let status = timeout(Duration::from_secs(5), shell.wait())
    .await
    .expect("cat ignored SIGTERM")
    .expect("wait failed");
  assert!(!status.success());
  assert_eq!(kill(shell.pid(), None), Err(Errno::ESRCH));
}

#[tokio::test]
#[serial]
async fn test_spawn_failure_reports_the_shell() {
  let pair = PtyPair::open().expect("Failed to open PTY pair");
  let err = ShellProcess::spawn("/no/such/shell", &pair.secondary).unwrap_err();
  assert!(err.to_string().contains("/no/such/shell"), "{}", err);
}
