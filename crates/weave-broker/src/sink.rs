//! Event delivery seam between the broker and a transport.

use tokio::sync::mpsc;

use weave_core::error::{Result, WeaveError};
use weave_core::event::StreamEvent;

/// Where emitted events go. Implementations must preserve emission order
/// for a single run.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent) -> Result<()>;
}

/// Sink backed by an unbounded channel, for in-process consumers and
/// tests.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>) -> Self {
        Self { tx }
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: StreamEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| WeaveError::Transport("event channel closed".into()))
    }
}
