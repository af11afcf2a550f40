//! Remote persistence API — the durable side of sync.
//!
//! The transport is plain JSON over HTTP; the remote's update and delete
//! endpoints are expected to be idempotent, since background mirroring
//! gives no ordering guarantee between quickly-issued calls.

use async_trait::async_trait;
use reqwest::StatusCode;

use weave_core::error::{Result, WeaveError};

use crate::local::{MessageRecord, ThreadRecord};

/// Remote thread/message CRUD, mirrored to by the reconciler.
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_thread(&self, thread: &ThreadRecord) -> Result<()>;
    async fn update_thread(&self, thread: &ThreadRecord) -> Result<()>;
    async fn delete_thread(&self, thread_id: &str) -> Result<()>;
    async fn list_threads(&self) -> Result<Vec<ThreadRecord>>;
    async fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>>;

    async fn create_message(&self, message: &MessageRecord) -> Result<()>;
    async fn update_message(&self, message: &MessageRecord) -> Result<()>;
    async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<()>;
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<MessageRecord>>;
}

/// HTTP implementation against a REST-ish base URL:
/// `/threads`, `/threads/{id}`, `/threads/{id}/messages`,
/// `/threads/{id}/messages/{id}`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn status_err(op: &str, e: reqwest::Error) -> WeaveError {
        WeaveError::Sync(format!("{op}: {e}"))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn create_thread(&self, thread: &ThreadRecord) -> Result<()> {
        self.client
            .post(self.url("/threads"))
            .json(thread)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("create_thread", e))?;
        Ok(())
    }

    async fn update_thread(&self, thread: &ThreadRecord) -> Result<()> {
        self.client
            .put(self.url(&format!("/threads/{}", thread.id)))
            .json(thread)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("update_thread", e))?;
        Ok(())
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("/threads/{thread_id}")))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("delete_thread", e))?;
        Ok(())
    }

    async fn list_threads(&self) -> Result<Vec<ThreadRecord>> {
        let threads = self
            .client
            .get(self.url("/threads"))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("list_threads", e))?
            .json()
            .await
            .map_err(|e| Self::status_err("list_threads", e))?;
        Ok(threads)
    }

    async fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        let response = self
            .client
            .get(self.url(&format!("/threads/{thread_id}")))
            .send()
            .await
            .map_err(|e| Self::status_err("get_thread", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let thread = response
            .error_for_status()
            .map_err(|e| Self::status_err("get_thread", e))?
            .json()
            .await
            .map_err(|e| Self::status_err("get_thread", e))?;
        Ok(Some(thread))
    }

    async fn create_message(&self, message: &MessageRecord) -> Result<()> {
        self.client
            .post(self.url(&format!("/threads/{}/messages", message.thread_id)))
            .json(message)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("create_message", e))?;
        Ok(())
    }

    async fn update_message(&self, message: &MessageRecord) -> Result<()> {
        self.client
            .put(self.url(&format!(
                "/threads/{}/messages/{}",
                message.thread_id, message.id
            )))
            .json(message)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("update_message", e))?;
        Ok(())
    }

    async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<()> {
        self.client
            .delete(self.url(&format!("/threads/{thread_id}/messages/{message_id}")))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("delete_message", e))?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<MessageRecord>> {
        let messages = self
            .client
            .get(self.url(&format!("/threads/{thread_id}/messages")))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::status_err("list_messages", e))?
            .json()
            .await
            .map_err(|e| Self::status_err("list_messages", e))?;
        Ok(messages)
    }
}
