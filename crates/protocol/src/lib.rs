//! toolhub Protocol
//!
//! Shared types for communication between the toolhub API and its clients.
//! REST bodies and WebSocket pushes are both serialized as JSON.

use uuid::Uuid;

// Re-exports
pub mod client;
pub mod server;
pub mod types;

pub use server::{Lenient, ServerMessage};
pub use types::*;

/// Generate a new unique ID
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
