// src/pty/mod.rs
pub mod messages;
pub mod session;

pub use session::{LoopOutcome, Session, SessionState};
