//! Single-task event dispatch.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use weave_core::event::StreamEvent;

use crate::materializer::StreamClient;

/// Drain delivery-ordered events into the shared client, one at a time.
/// The loop ends when the sender side closes (transport disconnect); the
/// caller reconnects and spawns a fresh dispatch with a new receiver —
/// no replay, the client just resumes listening.
pub fn spawn_dispatch(
    client: Arc<Mutex<StreamClient>>,
    mut rx: mpsc::UnboundedReceiver<StreamEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            client.lock().await.apply(event);
        }
        debug!("Event stream closed");
    })
}
