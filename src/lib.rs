// src/lib.rs
pub mod config;
pub mod error;
pub mod path;
pub mod platform;
pub mod pty;
#[cfg(test)]
mod test;
pub mod transport;
pub mod utils;
pub mod worker;

pub use config::ServerConfig;
pub use error::{BridgeError, StartupError};
pub use path::get_default_shell;
pub use pty::{Session, SessionState};
pub use transport::{Transport, WebSocketTransport};
pub use worker::Listener;
