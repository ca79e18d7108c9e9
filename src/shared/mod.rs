//! Shared state and wire messages
//!
//! Thread-safe state shared by the HTTP handlers and the message types they
//! send back to clients.

pub mod messages;
pub mod state;

pub use messages::{ErrorBody, LiveReply, UploadResponse};
pub use state::{ServiceStats, SharedAppState, SharedState};
