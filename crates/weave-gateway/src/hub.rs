//! Per-thread event fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use weave_broker::EventSink;
use weave_core::error::{Result, WeaveError};
use weave_core::event::StreamEvent;

/// Registry of connected clients per thread.
pub struct EventHub {
    threads: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
        }
    }

    /// Register a client on a thread and get its frame receiver.
    /// Nothing is replayed on subscribe.
    pub async fn subscribe(&self, thread_id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut threads = self.threads.write().await;
        threads.entry(thread_id.to_string()).or_default().push(tx);
        rx
    }

    /// Serialize an event once and fan it out to every client on the
    /// thread, pruning clients that have gone away.
    pub async fn publish(&self, thread_id: &str, event: &StreamEvent) {
        let frame = match serde_json::to_string(event) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(%e, "Failed to serialize event");
                return;
            }
        };
        let mut threads = self.threads.write().await;
        if let Some(clients) = threads.get_mut(thread_id) {
            clients.retain(|tx| tx.send(frame.clone()).is_ok());
            if clients.is_empty() {
                threads.remove(thread_id);
            }
        }
    }

    pub async fn client_count(&self, thread_id: &str) -> usize {
        self.threads
            .read()
            .await
            .get(thread_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Build the broker-facing sink for one thread. Events flow through
    /// a dedicated forward task, so emission stays synchronous and
    /// ordered while fan-out happens off the generation loop.
    pub fn sink_for(self: &Arc<Self>, thread_id: impl Into<String>) -> ThreadSink {
        let (tx, mut rx) = mpsc::unbounded_channel::<StreamEvent>();
        let hub = Arc::clone(self);
        let thread_id = thread_id.into();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                hub.publish(&thread_id, &event).await;
            }
            debug!(thread_id, "Thread sink closed");
        });
        ThreadSink { tx }
    }
}

/// [`EventSink`] for one thread, handed to the broker.
pub struct ThreadSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
}

impl EventSink for ThreadSink {
    fn emit(&self, event: StreamEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| WeaveError::Transport("thread sink closed".into()))
    }
}
