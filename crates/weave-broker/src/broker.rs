//! Per-run event state machine.
//!
//! `IDLE -> RUN_STARTED -> { THINKING* -> ARTIFACT_STREAMING_START ->
//! ARTIFACT_STREAMING* -> (ARTIFACT_CREATED | ARTIFACT_UPDATED) }* ->
//! RUN_FINISHED | ERROR`
//!
//! A run may cycle through several artifacts, but cycles never
//! interleave: a new START is rejected until the prior cycle's terminal
//! event has gone out. The store only ever receives completed artifacts;
//! an aborted run leaves any previously cached version untouched.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use weave_core::artifact::{Artifact, ArtifactContent, ArtifactKind};
use weave_core::error::{Result, WeaveError};
use weave_core::event::{EventPayload, StreamEvent};
use weave_core::protocol::{ArtifactRef, RunRequest};
use weave_store::ArtifactStore;

use crate::sink::EventSink;

/// An open artifact cycle: shell metadata plus the delta accumulator.
/// The buffer lives here and nowhere else, so a failed run has nothing
/// to roll back.
struct StreamingCycle {
    artifact_id: String,
    kind: ArtifactKind,
    language: Option<String>,
    title: String,
    is_update: bool,
    buffer: String,
}

enum RunPhase {
    Idle,
    Running,
    Streaming(StreamingCycle),
    Finished,
    Failed,
}

impl RunPhase {
    fn name(&self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::Running => "running",
            RunPhase::Streaming(_) => "streaming",
            RunPhase::Finished => "finished",
            RunPhase::Failed => "failed",
        }
    }
}

/// Drives one agent run's event sequence and persists finished artifacts.
pub struct EventBroker {
    run_id: String,
    thread_id: String,
    store: Arc<ArtifactStore>,
    sink: Arc<dyn EventSink>,
    phase: RunPhase,
}

impl EventBroker {
    pub fn new(
        run_id: impl Into<String>,
        thread_id: impl Into<String>,
        store: Arc<ArtifactStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            thread_id: thread_id.into(),
            store,
            sink,
            phase: RunPhase::Idle,
        }
    }

    /// Resolve which cached artifact a request targets. The deprecated
    /// inline fallback is cached first so the rest of the run sees one
    /// uniform id-based path.
    pub async fn resolve_request(&self, request: &RunRequest) -> Option<String> {
        match request.artifact_ref() {
            ArtifactRef::Cached(id) => Some(id),
            ArtifactRef::Inline(artifact) => {
                let id = artifact.id.clone();
                let id = self
                    .store
                    .store(*artifact, &self.thread_id, Some(&id))
                    .await;
                debug!(artifact_id = %id, "Cached inline artifact from request");
                Some(id)
            }
            ArtifactRef::None => None,
        }
    }

    pub fn start_run(&mut self) -> Result<()> {
        match self.phase {
            RunPhase::Idle => {}
            ref other => return Err(self.misuse("start_run", other.name())),
        }
        self.emit(EventPayload::RunStarted {
            run_id: self.run_id.clone(),
            thread_id: self.thread_id.clone(),
        })?;
        self.phase = RunPhase::Running;
        Ok(())
    }

    /// Emit a THINKING beat. Only valid between cycles.
    pub fn thinking(&mut self, text: Option<String>) -> Result<()> {
        match self.phase {
            RunPhase::Running => {}
            ref other => return Err(self.misuse("thinking", other.name())),
        }
        self.emit(EventPayload::Thinking { text })
    }

    /// Open an artifact cycle and emit ARTIFACT_STREAMING_START carrying
    /// the resolved id, so the client can buffer before the final object
    /// exists. Returns the id.
    ///
    /// With `artifact_id` given this is the update path; a missing or
    /// expired entry downgrades the cycle to a create under the same id,
    /// the recoverable NotFound fallback.
    pub async fn begin_artifact(
        &mut self,
        artifact_id: Option<String>,
        kind: ArtifactKind,
        language: Option<String>,
        title: impl Into<String>,
    ) -> Result<String> {
        match self.phase {
            RunPhase::Running => {}
            ref other => return Err(self.misuse("begin_artifact", other.name())),
        }

        let (id, is_update) = match artifact_id {
            Some(id) => {
                let cached = self.store.get(&id).await.is_some();
                if !cached {
                    debug!(artifact_id = %id, "No cached artifact; treating cycle as create");
                }
                (id, cached)
            }
            None => (Uuid::new_v4().to_string(), false),
        };

        let title = title.into();
        self.emit(EventPayload::ArtifactStreamingStart {
            artifact_id: id.clone(),
            kind,
            language: language.clone(),
            title: title.clone(),
            is_update,
        })?;
        self.phase = RunPhase::Streaming(StreamingCycle {
            artifact_id: id.clone(),
            kind,
            language,
            title,
            is_update,
            buffer: String::new(),
        });
        Ok(id)
    }

    /// Append a delta to the open cycle and emit it.
    pub fn stream_delta(&mut self, delta: &str) -> Result<()> {
        let artifact_id = match &mut self.phase {
            RunPhase::Streaming(cycle) => {
                cycle.buffer.push_str(delta);
                Some(cycle.artifact_id.clone())
            }
            _ => None,
        };
        let Some(artifact_id) = artifact_id else {
            return Err(self.misuse("stream_delta", self.phase.name()));
        };
        self.emit(EventPayload::ArtifactStreaming {
            artifact_id,
            delta: delta.to_string(),
        })
    }

    /// Close the open cycle: persist the accumulated content and emit the
    /// terminal event carrying the full artifact.
    pub async fn complete_artifact(&mut self) -> Result<Artifact> {
        let cycle = match std::mem::replace(&mut self.phase, RunPhase::Running) {
            RunPhase::Streaming(cycle) => cycle,
            other => {
                let err = self.misuse("complete_artifact", other.name());
                self.phase = other;
                return Err(err);
            }
        };

        let content = ArtifactContent::new(
            cycle.kind,
            cycle.language.clone(),
            cycle.title.clone(),
            cycle.buffer,
        );

        let (artifact, is_update) = if cycle.is_update {
            match self.store.append_version(&cycle.artifact_id, content.clone()).await {
                Ok(artifact) => (artifact, true),
                // Entry expired mid-run; fall back to a create under the
                // same id so the client's reference stays stable.
                Err(WeaveError::NotFound(_)) => {
                    warn!(artifact_id = %cycle.artifact_id, "Cached artifact expired mid-run; recreating");
                    (self.create(&cycle.artifact_id, content).await, false)
                }
                Err(e) => return Err(e),
            }
        } else {
            (self.create(&cycle.artifact_id, content).await, false)
        };

        let payload = if is_update {
            EventPayload::ArtifactUpdated {
                artifact_id: artifact.id.clone(),
                artifact: artifact.clone(),
            }
        } else {
            EventPayload::ArtifactCreated {
                artifact_id: artifact.id.clone(),
                artifact: artifact.clone(),
            }
        };
        self.emit(payload)?;
        debug!(
            artifact_id = %artifact.id,
            versions = artifact.version_count(),
            is_update,
            "Artifact cycle completed"
        );
        Ok(artifact)
    }

    /// Move a cached artifact's current-version pointer and announce it.
    pub async fn change_version(&mut self, artifact_id: &str, version: u32) -> Result<()> {
        match self.phase {
            RunPhase::Running => {}
            ref other => return Err(self.misuse("change_version", other.name())),
        }
        let mut artifact = self
            .store
            .get(artifact_id)
            .await
            .ok_or_else(|| WeaveError::NotFound(artifact_id.to_string()))?;
        artifact.set_current(version)?;
        self.store.update(artifact_id, artifact).await?;
        self.emit(EventPayload::ArtifactVersionChanged {
            artifact_id: artifact_id.to_string(),
            version,
        })
    }

    /// Emit an application-defined CUSTOM event.
    pub fn custom(&mut self, name: impl Into<String>, value: serde_json::Value) -> Result<()> {
        match self.phase {
            RunPhase::Running | RunPhase::Streaming(_) => {}
            ref other => return Err(self.misuse("custom", other.name())),
        }
        self.emit(EventPayload::Custom {
            name: name.into(),
            value,
        })
    }

    pub fn finish_run(&mut self) -> Result<()> {
        match self.phase {
            RunPhase::Running => {}
            ref other => return Err(self.misuse("finish_run", other.name())),
        }
        self.emit(EventPayload::RunFinished {
            run_id: self.run_id.clone(),
        })?;
        self.phase = RunPhase::Finished;
        Ok(())
    }

    /// Abort the run. Any open cycle is discarded without committing, so
    /// a previously cached version survives a failed regeneration.
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        match self.phase {
            RunPhase::Idle | RunPhase::Finished | RunPhase::Failed => {
                return Err(self.misuse("fail", self.phase.name()))
            }
            _ => {}
        }
        self.phase = RunPhase::Failed;
        self.emit(EventPayload::Error {
            message: message.into(),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.phase, RunPhase::Finished | RunPhase::Failed)
    }

    async fn create(&self, artifact_id: &str, content: ArtifactContent) -> Artifact {
        let artifact = Artifact::new(artifact_id, &self.thread_id, content);
        self.store
            .store(artifact.clone(), &self.thread_id, Some(artifact_id))
            .await;
        artifact
    }

    fn emit(&self, payload: EventPayload) -> Result<()> {
        self.sink.emit(StreamEvent::new(payload))
    }

    fn misuse(&self, op: &str, phase: &str) -> WeaveError {
        WeaveError::Broker(format!(
            "{op} not allowed in phase {phase} (run {})",
            self.run_id
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use crate::sink::ChannelSink;
    use weave_core::protocol::{ChatMessage, RunRequest};

    fn setup() -> (
        EventBroker,
        Arc<ArtifactStore>,
        mpsc::UnboundedReceiver<StreamEvent>,
    ) {
        let store = Arc::new(ArtifactStore::new(Duration::from_secs(60)));
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = EventBroker::new(
            "r1",
            "t1",
            Arc::clone(&store),
            Arc::new(ChannelSink::new(tx)),
        );
        (broker, store, rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn type_tags(events: &[StreamEvent]) -> Vec<String> {
        events
            .iter()
            .map(|e| {
                serde_json::to_value(e).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_create_cycle_emits_ordered_sequence() {
        let (mut broker, store, mut rx) = setup();

        broker.start_run().unwrap();
        broker.thinking(Some("planning".into())).unwrap();
        let id = broker
            .begin_artifact(None, ArtifactKind::Code, Some("rust".into()), "main.rs")
            .await
            .unwrap();
        broker.stream_delta("fn main() {").unwrap();
        broker.stream_delta(" }").unwrap();
        let artifact = broker.complete_artifact().await.unwrap();
        broker.finish_run().unwrap();

        assert_eq!(artifact.current().body, "fn main() { }");
        assert_eq!(store.get(&id).await.unwrap().current().body, "fn main() { }");

        let events = drain(&mut rx);
        assert_eq!(
            type_tags(&events),
            vec![
                "RUN_STARTED",
                "THINKING",
                "ARTIFACT_STREAMING_START",
                "ARTIFACT_STREAMING",
                "ARTIFACT_STREAMING",
                "ARTIFACT_CREATED",
                "RUN_FINISHED",
            ]
        );
        // START already carries the minted id
        assert_eq!(events[2].artifact_id(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_update_cycle_appends_version() {
        let (mut broker, store, mut rx) = setup();
        let id = store
            .store(
                Artifact::new(
                    "",
                    "",
                    ArtifactContent::new(ArtifactKind::Code, Some("rust".into()), "main.rs", "v1"),
                ),
                "t1",
                None,
            )
            .await;

        broker.start_run().unwrap();
        broker
            .begin_artifact(Some(id.clone()), ArtifactKind::Code, Some("rust".into()), "main.rs")
            .await
            .unwrap();
        broker.stream_delta("v2").unwrap();
        let artifact = broker.complete_artifact().await.unwrap();
        broker.finish_run().unwrap();

        assert_eq!(artifact.current_index, 2);
        assert_eq!(artifact.contents.len(), 2);
        assert_eq!(artifact.contents[0].body, "v1");

        let events = drain(&mut rx);
        let tags = type_tags(&events);
        assert!(tags.contains(&"ARTIFACT_UPDATED".to_string()));
        // Terminal event carries the full current content
        match &events[3].payload {
            EventPayload::ArtifactUpdated { artifact, .. } => {
                assert_eq!(artifact.current().body, "v2");
                assert_eq!(artifact.contents.len(), 2);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cycles_never_interleave() {
        let (mut broker, _store, _rx) = setup();
        broker.start_run().unwrap();
        broker
            .begin_artifact(None, ArtifactKind::Text, None, "notes")
            .await
            .unwrap();

        let err = broker
            .begin_artifact(None, ArtifactKind::Text, None, "more notes")
            .await
            .unwrap_err();
        assert!(matches!(err, WeaveError::Broker(_)));

        // thinking is likewise confined to the between-cycles gap
        assert!(broker.thinking(None).is_err());
        assert!(broker.finish_run().is_err());
    }

    #[tokio::test]
    async fn test_delta_outside_cycle_rejected() {
        let (mut broker, _store, _rx) = setup();
        assert!(broker.stream_delta("x").is_err());
        broker.start_run().unwrap();
        assert!(broker.stream_delta("x").is_err());
    }

    #[tokio::test]
    async fn test_error_never_commits_partial_artifact() {
        let (mut broker, store, mut rx) = setup();
        let id = store
            .store(
                Artifact::new(
                    "",
                    "",
                    ArtifactContent::new(ArtifactKind::Text, None, "notes", "v1"),
                ),
                "t1",
                None,
            )
            .await;

        broker.start_run().unwrap();
        broker
            .begin_artifact(Some(id.clone()), ArtifactKind::Text, None, "notes")
            .await
            .unwrap();
        broker.stream_delta("half-finished").unwrap();
        broker.fail("provider timeout").unwrap();

        // Prior cached version untouched
        let cached = store.get(&id).await.unwrap();
        assert_eq!(cached.contents.len(), 1);
        assert_eq!(cached.current().body, "v1");

        let tags = type_tags(&drain(&mut rx));
        assert_eq!(tags.last().unwrap(), "ERROR");
        assert!(broker.is_terminal());
    }

    #[tokio::test]
    async fn test_missing_cached_artifact_falls_back_to_create() {
        let (mut broker, store, mut rx) = setup();
        broker.start_run().unwrap();
        let id = broker
            .begin_artifact(Some("ghost".into()), ArtifactKind::Text, None, "notes")
            .await
            .unwrap();
        assert_eq!(id, "ghost");
        broker.stream_delta("fresh").unwrap();
        broker.complete_artifact().await.unwrap();

        // Create path, same id, so the client's reference stays valid
        assert_eq!(store.get("ghost").await.unwrap().current().body, "fresh");
        let tags = type_tags(&drain(&mut rx));
        assert!(tags.contains(&"ARTIFACT_CREATED".to_string()));
    }

    #[tokio::test]
    async fn test_change_version() {
        let (mut broker, store, mut rx) = setup();
        let id = store
            .store(
                Artifact::new(
                    "",
                    "",
                    ArtifactContent::new(ArtifactKind::Text, None, "notes", "v1"),
                ),
                "t1",
                None,
            )
            .await;
        store
            .append_version(&id, ArtifactContent::new(ArtifactKind::Text, None, "notes", "v2"))
            .await
            .unwrap();

        broker.start_run().unwrap();
        broker.change_version(&id, 1).await.unwrap();

        assert_eq!(store.get(&id).await.unwrap().current_index, 1);
        let events = drain(&mut rx);
        match &events.last().unwrap().payload {
            EventPayload::ArtifactVersionChanged { version, .. } => assert_eq!(*version, 1),
            other => panic!("unexpected payload: {other:?}"),
        }

        assert!(broker.change_version(&id, 9).await.is_err());
    }

    #[tokio::test]
    async fn test_custom_event_allowed_mid_cycle() {
        let (mut broker, _store, mut rx) = setup();
        assert!(broker.custom("cursor", serde_json::json!({})).is_err());

        broker.start_run().unwrap();
        broker
            .begin_artifact(None, ArtifactKind::Text, None, "notes")
            .await
            .unwrap();
        broker
            .custom("cursor", serde_json::json!({ "line": 4 }))
            .unwrap();

        let events = drain(&mut rx);
        match &events.last().unwrap().payload {
            EventPayload::Custom { name, value } => {
                assert_eq!(name, "cursor");
                assert_eq!(value["line"], 4);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_request_prefers_id_and_caches_inline() {
        let (broker, store, _rx) = setup();

        let mut request = RunRequest {
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "go".into(),
            }],
            thread_id: "t1".into(),
            run_id: "r1".into(),
            artifact_id: None,
            artifact: Some(Artifact::new(
                "legacy",
                "t1",
                ArtifactContent::new(ArtifactKind::Text, None, "doc", "inline body"),
            )),
            selected_text: None,
        };

        // Inline fallback lands in the cache under its own id
        let resolved = broker.resolve_request(&request).await;
        assert_eq!(resolved.as_deref(), Some("legacy"));
        assert_eq!(
            store.get("legacy").await.unwrap().current().body,
            "inline body"
        );

        // An explicit id wins over the inline object
        request.artifact_id = Some("preferred".into());
        assert_eq!(
            broker.resolve_request(&request).await.as_deref(),
            Some("preferred")
        );
    }
}
