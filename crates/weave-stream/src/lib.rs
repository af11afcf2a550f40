//! Client-side materializer for the canvas event stream.
//!
//! Applies the ordered event sequence one at a time on a single dispatch
//! task and keeps the materialized artifact state the UI reads from.

pub mod dispatch;
pub mod materializer;

pub use dispatch::spawn_dispatch;
pub use materializer::StreamClient;
