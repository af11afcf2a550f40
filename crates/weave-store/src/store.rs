//! Artifact cache with sliding TTL, per-key serialization, and a
//! background sweeper.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

use weave_core::artifact::{Artifact, ArtifactContent};
use weave_core::error::{Result, WeaveError};

/// One cached artifact plus its expiry window.
struct CacheEntry {
    artifact: Artifact,
    stored_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(artifact: Artifact, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            artifact,
            stored_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Sliding TTL: reset the expiry window from now.
    fn touch(&mut self, ttl: Duration) {
        self.expires_at = Utc::now() + ttl;
    }
}

/// Point-in-time store counters.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    /// Entries currently resident (expired-but-unswept included).
    pub count: usize,
    /// Threads with at least one indexed artifact.
    pub thread_count: usize,
    /// Cumulative entries removed by lazy reads and sweeps.
    pub expired_count: u64,
}

/// Concurrent, expiring artifact cache.
///
/// Lock order is always: `entries` map lock, then a single entry mutex,
/// then (after both are released) the thread index. The sweeper follows
/// the same order, so it can run concurrently with request traffic.
///
/// An entry whose TTL has elapsed reads as absent; callers cannot
/// distinguish never-stored from expired, and both surface as
/// [`WeaveError::NotFound`] on the mutating operations.
pub struct ArtifactStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, Arc<Mutex<CacheEntry>>>>,
    threads: RwLock<HashMap<String, HashSet<String>>>,
    evicted: AtomicU64,
}

impl ArtifactStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            threads: RwLock::new(HashMap::new()),
            evicted: AtomicU64::new(0),
        }
    }

    /// Insert or replace an artifact, returning its id.
    ///
    /// With `artifact_id` given, the entry's contents are replaced and its
    /// expiry refreshed (an expired entry is revived in place). Without
    /// one, a fresh id is minted.
    pub async fn store(
        &self,
        mut artifact: Artifact,
        thread_id: &str,
        artifact_id: Option<&str>,
    ) -> String {
        let id = artifact_id
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        artifact.id = id.clone();
        artifact.thread_id = thread_id.to_string();

        // Fast path: replace in place under the entry lock. Holding the
        // map read lock across it keeps the sweeper from removing the
        // entry underneath us.
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&id) {
                let mut guard = entry.lock().await;
                let old_thread_id = guard.artifact.thread_id.clone();
                *guard = CacheEntry::new(artifact, self.ttl);
                drop(guard);
                drop(entries);
                if old_thread_id != thread_id {
                    self.index_remove(&old_thread_id, &id).await;
                }
                self.index_insert(thread_id, &id).await;
                debug!(artifact_id = %id, thread_id, "Replaced cached artifact");
                return id;
            }
        }

        let mut entries = self.entries.write().await;
        entries.insert(
            id.clone(),
            Arc::new(Mutex::new(CacheEntry::new(artifact, self.ttl))),
        );
        drop(entries);
        self.index_insert(thread_id, &id).await;
        debug!(artifact_id = %id, thread_id, "Stored new artifact");
        id
    }

    /// Fetch a non-expired artifact. An expired entry reads as absent and
    /// is purged on the way out.
    pub async fn get(&self, artifact_id: &str) -> Option<Artifact> {
        let entry = { self.entries.read().await.get(artifact_id).cloned() }?;
        {
            let guard = entry.lock().await;
            if !guard.is_expired() {
                return Some(guard.artifact.clone());
            }
        }
        self.evict_if_expired(artifact_id).await;
        None
    }

    /// Whole-content replace of an existing entry (last-write-wins).
    /// Fails with [`WeaveError::NotFound`] when the key is missing or
    /// expired; id and thread ownership are kept from the stored entry.
    pub async fn update(&self, artifact_id: &str, mut artifact: Artifact) -> Result<()> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| WeaveError::NotFound(artifact_id.to_string()))?;
        let mut guard = entry.lock().await;
        if guard.is_expired() {
            drop(guard);
            drop(entries);
            self.evict_if_expired(artifact_id).await;
            return Err(WeaveError::NotFound(artifact_id.to_string()));
        }
        artifact.id = guard.artifact.id.clone();
        artifact.thread_id = guard.artifact.thread_id.clone();
        guard.artifact = artifact;
        guard.touch(self.ttl);
        Ok(())
    }

    /// Append a version to a cached artifact and advance its pointer.
    /// The whole read-modify-write runs under the entry lock, so two
    /// concurrent appends can never drop a version.
    pub async fn append_version(
        &self,
        artifact_id: &str,
        content: ArtifactContent,
    ) -> Result<Artifact> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(artifact_id)
            .cloned()
            .ok_or_else(|| WeaveError::NotFound(artifact_id.to_string()))?;
        let mut guard = entry.lock().await;
        if guard.is_expired() {
            drop(guard);
            drop(entries);
            self.evict_if_expired(artifact_id).await;
            return Err(WeaveError::NotFound(artifact_id.to_string()));
        }
        guard.artifact.push_version(content);
        guard.touch(self.ttl);
        Ok(guard.artifact.clone())
    }

    /// All non-expired artifacts owned by a thread, via the thread index.
    pub async fn thread_artifacts(&self, thread_id: &str) -> Vec<Artifact> {
        let ids: Vec<String> = {
            let threads = self.threads.read().await;
            match threads.get(thread_id) {
                Some(ids) => ids.iter().cloned().collect(),
                None => return Vec::new(),
            }
        };
        let mut artifacts = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(artifact) = self.get(&id).await {
                artifacts.push(artifact);
            }
        }
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        artifacts
    }

    /// Remove an entry. Missing and expired keys both fail with
    /// [`WeaveError::NotFound`]; an expired entry is purged regardless.
    pub async fn delete(&self, artifact_id: &str) -> Result<()> {
        let removed = {
            let mut entries = self.entries.write().await;
            entries.remove(artifact_id)
        };
        let Some(entry) = removed else {
            return Err(WeaveError::NotFound(artifact_id.to_string()));
        };
        let (thread_id, expired) = {
            let guard = entry.lock().await;
            (guard.artifact.thread_id.clone(), guard.is_expired())
        };
        self.index_remove(&thread_id, artifact_id).await;
        if expired {
            self.evicted.fetch_add(1, Ordering::Relaxed);
            return Err(WeaveError::NotFound(artifact_id.to_string()));
        }
        debug!(artifact_id, "Deleted artifact");
        Ok(())
    }

    /// Remove every expired entry, returning how many were purged.
    ///
    /// Runs concurrently with request traffic: snapshots the key set,
    /// then re-checks expiry under each entry's lock before removing, so
    /// an entry revived in the meantime survives.
    pub async fn sweep(&self) -> usize {
        let keys: Vec<String> = { self.entries.read().await.keys().cloned().collect() };
        let mut removed = 0;
        for key in keys {
            if self.evict_if_expired(&key).await {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Sweep purged expired artifacts");
        }
        removed
    }

    pub async fn stats(&self) -> StoreStats {
        StoreStats {
            count: self.entries.read().await.len(),
            thread_count: self.threads.read().await.len(),
            expired_count: self.evicted.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic sweeper task.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        })
    }

    /// Remove one entry iff it is still expired under its own lock.
    async fn evict_if_expired(&self, artifact_id: &str) -> bool {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get(artifact_id).cloned() else {
            return false;
        };
        let guard = entry.lock().await;
        if !guard.is_expired() {
            return false;
        }
        let thread_id = guard.artifact.thread_id.clone();
        let age_secs = (Utc::now() - guard.stored_at).num_seconds();
        drop(guard);
        entries.remove(artifact_id);
        drop(entries);
        self.index_remove(&thread_id, artifact_id).await;
        self.evicted.fetch_add(1, Ordering::Relaxed);
        debug!(artifact_id, age_secs, "Evicted expired artifact");
        true
    }

    async fn index_insert(&self, thread_id: &str, artifact_id: &str) {
        let mut threads = self.threads.write().await;
        threads
            .entry(thread_id.to_string())
            .or_default()
            .insert(artifact_id.to_string());
    }

    async fn index_remove(&self, thread_id: &str, artifact_id: &str) {
        let mut threads = self.threads.write().await;
        if let Some(ids) = threads.get_mut(thread_id) {
            ids.remove(artifact_id);
            if ids.is_empty() {
                threads.remove(thread_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::artifact::ArtifactKind;

    fn artifact(body: &str) -> Artifact {
        Artifact::new(
            "",
            "",
            ArtifactContent::new(ArtifactKind::Code, Some("rust".into()), "main.rs", body),
        )
    }

    fn short_ttl() -> Duration {
        Duration::from_millis(30)
    }

    #[tokio::test]
    async fn test_get_missing_is_absent() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        assert!(store.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_store_get_roundtrip() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let id = store.store(artifact("v1"), "t1", None).await;
        let got = store.get(&id).await.unwrap();
        assert_eq!(got.id, id);
        assert_eq!(got.thread_id, "t1");
        assert_eq!(got.current().body, "v1");
    }

    #[tokio::test]
    async fn test_update_is_last_write_wins() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let id = store.store(artifact("v1"), "t1", None).await;

        store.update(&id, artifact("v2")).await.unwrap();
        let got = store.get(&id).await.unwrap();
        assert_eq!(got.current().body, "v2");
        // Replace, not merge
        assert_eq!(got.contents.len(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let err = store.update("nope", artifact("x")).await.unwrap_err();
        assert!(matches!(err, WeaveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_lazy_expiry() {
        let store = ArtifactStore::new(short_ttl());
        let id = store.store(artifact("v1"), "t1", None).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(store.get(&id).await.is_none());

        let stats = store.stats().await;
        assert_eq!(stats.count, 0);
        assert_eq!(stats.expired_count, 1);
    }

    #[tokio::test]
    async fn test_update_refreshes_ttl() {
        let store = ArtifactStore::new(Duration::from_millis(250));
        let id = store.store(artifact("v1"), "t1", None).await;

        // Keep touching the entry past its original window
        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            store.update(&id, artifact("v2")).await.unwrap();
        }
        assert!(store.get(&id).await.is_some());
    }

    #[tokio::test]
    async fn test_thread_artifacts() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let a = store.store(artifact("a"), "t1", None).await;
        let b = store.store(artifact("b"), "t1", None).await;
        store.store(artifact("c"), "t2", None).await;

        let mut expected = vec![a, b];
        expected.sort();
        let got: Vec<String> = store
            .thread_artifacts("t1")
            .await
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(got, expected);
        assert!(store.thread_artifacts("t3").await.is_empty());
    }

    #[tokio::test]
    async fn test_thread_artifacts_skips_expired() {
        let store = ArtifactStore::new(short_ttl());
        store.store(artifact("a"), "t1", None).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let live = store.store(artifact("b"), "t1", None).await;

        let got = store.thread_artifacts("t1").await;
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].id, live);
    }

    #[tokio::test]
    async fn test_version_ledger_scenario() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let id = store.store(artifact("v1"), "t1", None).await;
        assert_eq!(store.get(&id).await.unwrap().current().body, "v1");

        let updated = store
            .append_version(
                &id,
                ArtifactContent::new(ArtifactKind::Code, Some("rust".into()), "main.rs", "v2"),
            )
            .await
            .unwrap();
        assert_eq!(updated.current_index, 2);
        assert_eq!(updated.contents.len(), 2);
        assert_eq!(updated.contents[0].body, "v1");
        assert_eq!(updated.contents[1].body, "v2");

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.is_none());
        assert!(matches!(
            store.delete(&id).await.unwrap_err(),
            WeaveError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_store_with_explicit_id_replaces() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let id = store.store(artifact("v1"), "t1", None).await;
        let same = store.store(artifact("v2"), "t1", Some(&id)).await;
        assert_eq!(same, id);
        assert_eq!(store.get(&id).await.unwrap().current().body, "v2");
        assert_eq!(store.stats().await.count, 1);
    }

    #[tokio::test]
    async fn test_restore_under_new_thread_moves_index_entry() {
        let store = ArtifactStore::new(Duration::from_secs(60));
        let id = store.store(artifact("v1"), "t1", None).await;
        store.store(artifact("v2"), "t2", Some(&id)).await;

        assert!(store.thread_artifacts("t1").await.is_empty());
        let moved = store.thread_artifacts("t2").await;
        assert_eq!(moved.len(), 1);
        assert_eq!(moved[0].id, id);
        assert_eq!(moved[0].thread_id, "t2");
        assert_eq!(store.stats().await.thread_count, 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize_per_key() {
        let store = Arc::new(ArtifactStore::new(Duration::from_secs(60)));
        let id = store.store(artifact("v0"), "t1", None).await;

        let mut handles = Vec::new();
        for body in ["xxxx", "yyyy"] {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store.update(&id, artifact(body)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Exactly one writer wins, never a hybrid
        let body = store.get(&id).await.unwrap().current().body.clone();
        assert!(body == "xxxx" || body == "yyyy", "corrupt body: {body}");
    }

    #[tokio::test]
    async fn test_concurrent_appends_do_not_drop_versions() {
        let store = Arc::new(ArtifactStore::new(Duration::from_secs(60)));
        let id = store.store(artifact("v1"), "t1", None).await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move {
                store
                    .append_version(
                        &id,
                        ArtifactContent::new(ArtifactKind::Text, None, "t", format!("v{i}")),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let got = store.get(&id).await.unwrap();
        assert_eq!(got.contents.len(), 9);
        assert_eq!(got.current_index, 9);
        for (i, content) in got.contents.iter().enumerate() {
            assert_eq!(content.index as usize, i + 1);
        }
    }

    #[tokio::test]
    async fn test_sweep_purges_only_expired() {
        let store = ArtifactStore::new(short_ttl());
        store.store(artifact("old-a"), "t1", None).await;
        store.store(artifact("old-b"), "t1", None).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let live = store.store(artifact("live"), "t2", None).await;

        let removed = store.sweep().await;
        assert_eq!(removed, 2);
        assert!(store.get(&live).await.is_some());

        let stats = store.stats().await;
        assert_eq!(stats.count, 1);
        assert_eq!(stats.thread_count, 1);
        assert_eq!(stats.expired_count, 2);
    }
}
