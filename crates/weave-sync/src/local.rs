//! JSONL-based thread/message store — the fast local side of sync.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use weave_core::error::{Result, WeaveError};

/// A conversation thread record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadRecord {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One message in a thread's log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// File-based store using JSONL for message logs.
///
/// Layout:
/// - `<base>/threads.json` — array of `ThreadRecord`
/// - `<base>/messages/<thread_id>.jsonl` — one message per line
///
/// Every mutation is a read-modify-write over a whole file, so a single
/// write lock serializes them; reads go lock-free against the last
/// atomically renamed snapshot.
pub struct JsonlThreadStore {
    base: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlThreadStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            write_lock: Mutex::new(()),
        }
    }

    fn index_path(&self) -> PathBuf {
        self.base.join("threads.json")
    }

    fn message_dir(&self) -> PathBuf {
        self.base.join("messages")
    }

    fn message_path(&self, thread_id: &str) -> PathBuf {
        self.message_dir().join(format!("{thread_id}.jsonl"))
    }

    async fn ensure_dirs(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        tokio::fs::create_dir_all(self.message_dir()).await?;
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<ThreadRecord>> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let threads: Vec<ThreadRecord> = serde_json::from_str(&data)?;
        Ok(threads)
    }

    async fn save_index(&self, threads: &[ThreadRecord]) -> Result<()> {
        self.ensure_dirs().await?;
        let data = serde_json::to_string_pretty(threads)?;
        let path = self.index_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn save_messages(&self, thread_id: &str, messages: &[MessageRecord]) -> Result<()> {
        self.ensure_dirs().await?;
        let mut data = String::new();
        for message in messages {
            data.push_str(&serde_json::to_string(message)?);
            data.push('\n');
        }
        let path = self.message_path(thread_id);
        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Insert or replace a thread in the index.
    pub async fn upsert_thread(&self, thread: &ThreadRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut threads = self.load_index().await?;
        if let Some(existing) = threads.iter_mut().find(|t| t.id == thread.id) {
            *existing = thread.clone();
        } else {
            threads.push(thread.clone());
        }
        self.save_index(&threads).await?;
        debug!(thread_id = %thread.id, "Saved thread");
        Ok(())
    }

    pub async fn list_threads(&self) -> Result<Vec<ThreadRecord>> {
        self.load_index().await
    }

    pub async fn get_thread(&self, thread_id: &str) -> Result<Option<ThreadRecord>> {
        let threads = self.load_index().await?;
        Ok(threads.into_iter().find(|t| t.id == thread_id))
    }

    /// Remove a thread and its message log.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut threads = self.load_index().await?;
        threads.retain(|t| t.id != thread_id);
        self.save_index(&threads).await?;

        let path = self.message_path(thread_id);
        if path.exists() {
            tokio::fs::remove_file(&path).await?;
        }
        debug!(thread_id, "Deleted thread");
        Ok(())
    }

    /// Append one message to a thread's JSONL log.
    pub async fn append_message(&self, message: &MessageRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.ensure_dirs().await?;

        let path = self.message_path(&message.thread_id);
        let line = serde_json::to_string(message)?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        // Bump the owning thread's updated_at
        let mut threads = self.load_index().await?;
        if let Some(thread) = threads.iter_mut().find(|t| t.id == message.thread_id) {
            thread.updated_at = Utc::now();
            self.save_index(&threads).await?;
        }
        Ok(())
    }

    pub async fn list_messages(&self, thread_id: &str) -> Result<Vec<MessageRecord>> {
        let path = self.message_path(thread_id);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let data = tokio::fs::read_to_string(&path).await?;
        let mut messages = Vec::new();
        for line in data.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let message: MessageRecord = serde_json::from_str(line)
                .map_err(|e| WeaveError::Sync(format!("corrupt message line: {e}")))?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Replace a message in place by id.
    pub async fn update_message(&self, message: &MessageRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.list_messages(&message.thread_id).await?;
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => return Err(WeaveError::NotFound(message.id.clone())),
        }
        self.save_messages(&message.thread_id, &messages).await
    }

    pub async fn delete_message(&self, thread_id: &str, message_id: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut messages = self.list_messages(thread_id).await?;
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        if messages.len() == before {
            return Err(WeaveError::NotFound(message_id.to_string()));
        }
        self.save_messages(thread_id, &messages).await
    }
}
