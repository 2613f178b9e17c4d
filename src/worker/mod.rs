// src/worker/mod.rs

/// The `worker` module accepts transport connections and hands each one to a
/// fresh `Session`.
pub mod listener;

pub use listener::Listener;
