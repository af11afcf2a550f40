//! Optimistic local-first writes with fire-and-forget remote mirroring.

use std::sync::Arc;

use tracing::warn;

use weave_core::error::Result;

use crate::local::{JsonlThreadStore, MessageRecord, ThreadRecord};
use crate::remote::RemoteApi;

/// Commits user actions locally, then mirrors them remotely in the
/// background.
///
/// Each method returns as soon as the local write lands. The spawned
/// remote task is not cancellable, not retried, and unordered relative
/// to other spawned tasks — two quick calls (create thread, then add
/// message) may reach the remote out of order, a documented risk the
/// remote side tolerates via idempotent update/delete. Remote failures
/// are logged and discarded; the local record is never rolled back.
pub struct SyncReconciler {
    local: Arc<JsonlThreadStore>,
    remote: Option<Arc<dyn RemoteApi>>,
}

impl SyncReconciler {
    pub fn new(local: Arc<JsonlThreadStore>, remote: Option<Arc<dyn RemoteApi>>) -> Self {
        Self { local, remote }
    }

    pub fn local(&self) -> &JsonlThreadStore {
        &self.local
    }

    pub async fn create_thread(&self, thread: ThreadRecord) -> Result<()> {
        self.local.upsert_thread(&thread).await?;
        if let Some(remote) = self.remote.clone() {
            tokio::spawn(async move {
                if let Err(e) = remote.create_thread(&thread).await {
                    warn!(error = %e, thread_id = %thread.id, "Remote thread create failed; local copy kept");
                }
            });
        }
        Ok(())
    }

    pub async fn update_thread(&self, thread: ThreadRecord) -> Result<()> {
        self.local.upsert_thread(&thread).await?;
        if let Some(remote) = self.remote.clone() {
            tokio::spawn(async move {
                if let Err(e) = remote.update_thread(&thread).await {
                    warn!(error = %e, thread_id = %thread.id, "Remote thread update failed; local copy kept");
                }
            });
        }
        Ok(())
    }

    pub async fn delete_thread(&self, thread_id: String) -> Result<()> {
        self.local.delete_thread(&thread_id).await?;
        if let Some(remote) = self.remote.clone() {
            tokio::spawn(async move {
                if let Err(e) = remote.delete_thread(&thread_id).await {
                    warn!(error = %e, thread_id, "Remote thread delete failed");
                }
            });
        }
        Ok(())
    }

    pub async fn add_message(&self, message: MessageRecord) -> Result<()> {
        self.local.append_message(&message).await?;
        if let Some(remote) = self.remote.clone() {
            tokio::spawn(async move {
                if let Err(e) = remote.create_message(&message).await {
                    warn!(error = %e, message_id = %message.id, "Remote message create failed; local copy kept");
                }
            });
        }
        Ok(())
    }

    pub async fn update_message(&self, message: MessageRecord) -> Result<()> {
        self.local.update_message(&message).await?;
        if let Some(remote) = self.remote.clone() {
            tokio::spawn(async move {
                if let Err(e) = remote.update_message(&message).await {
                    warn!(error = %e, message_id = %message.id, "Remote message update failed; local copy kept");
                }
            });
        }
        Ok(())
    }

    pub async fn delete_message(&self, thread_id: String, message_id: String) -> Result<()> {
        self.local.delete_message(&thread_id, &message_id).await?;
        if let Some(remote) = self.remote.clone() {
            tokio::spawn(async move {
                if let Err(e) = remote.delete_message(&thread_id, &message_id).await {
                    warn!(error = %e, message_id, "Remote message delete failed");
                }
            });
        }
        Ok(())
    }
}
