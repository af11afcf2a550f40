//! WebSocket fan-out for canvas event streams.
//!
//! Delivers each thread's ordered event sequence to every connected
//! client. Clients reconnecting get no history replay; they resume
//! listening for new events on the same thread.

pub mod hub;
pub mod server;

pub use hub::{EventHub, ThreadSink};
pub use server::{start_gateway, AppState};
