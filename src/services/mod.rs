//! Hub services used by the websocket route and the hub binary.
//!
//! ARCHITECTURE
//! ============
//! Service modules own channel membership and durable-store housekeeping so
//! the websocket handler can stay focused on frame translation.

pub mod channel;
pub mod retention;
