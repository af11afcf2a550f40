//! Event broker — converts agent generation steps into the ordered,
//! typed event sequence a canvas client consumes.
//!
//! The broker emits on the agent loop's own execution context through a
//! narrow [`EventSink`]; concrete transports implement the sink. No
//! backpressure is applied anywhere on this path: a fast producer is not
//! slowed by a slow consumer, and buffering is left to the transport.

pub mod broker;
pub mod sink;

pub use broker::EventBroker;
pub use sink::{ChannelSink, EventSink};
