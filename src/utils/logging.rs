// src/utils/logging.rs

use env_logger::{Builder, Env};
use log::LevelFilter;

/// Environment variable that overrides the log filter (env_logger syntax).
pub const LOG_ENV: &str = "PTY_BRIDGE_LOG";

/// Initializes logging using `env_logger`.
///
/// The default level is `Info`, or `Debug` when `debug` is set. A filter in the
/// `PTY_BRIDGE_LOG` environment variable takes precedence over both.
///
/// Calling this more than once is harmless; later calls only report that a
/// logger is already installed.
///
/// # Examples
///
/// ```rust
/// pty_ws_bridge::utils::logging::initialize_logging(false);
/// log::info!("Logging has been initialized.");
/// ```
pub fn initialize_logging(debug: bool) {
  let default_level = if debug {
    LevelFilter::Debug
  } else {
    LevelFilter::Info
  };

  let mut builder = Builder::new();
  builder.filter_level(default_level);
  // Applied after the default so the environment wins.
  builder.parse_env(Env::default().filter(LOG_ENV));

  if let Err(e) = builder.try_init() {
    // Logger is already initialized; log the information and proceed.
    eprintln!("Logger already initialized: {}", e);
  }
  log::debug!("Logging initialized");
}
