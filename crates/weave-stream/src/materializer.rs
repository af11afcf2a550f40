//! Event application and artifact materialization.

use std::collections::HashMap;

use tracing::{debug, warn};

use weave_core::artifact::{Artifact, ArtifactKind};
use weave_core::error::Result;
use weave_core::event::{EventPayload, StreamEvent};

/// The in-flight streaming buffer for one artifact cycle. Deltas only
/// ever land here; materialized artifacts are replaced wholesale by the
/// cycle's terminal event.
#[derive(Debug, Clone)]
pub struct StreamingBuffer {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub language: Option<String>,
    pub title: String,
    pub is_update: bool,
    pub text: String,
}

/// Materializes artifact state from the event stream.
///
/// Events are applied in arrival order on a single task, so no internal
/// locking is needed. Duplicate redelivery after a reconnect is safe:
/// terminal events carry the full authoritative artifact, and re-applying
/// one is a no-op relative to final state. No history replay happens on
/// reconnect; an interrupted stream stays "in progress" until the next
/// RUN_STARTED resets it.
#[derive(Debug, Default)]
pub struct StreamClient {
    artifacts: HashMap<String, Artifact>,
    buffer: Option<StreamingBuffer>,
    run_active: bool,
    last_error: Option<String>,
    custom_events: Vec<(String, serde_json::Value)>,
}

impl StreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event from the ordered stream.
    pub fn apply(&mut self, event: StreamEvent) {
        match event.payload {
            EventPayload::RunStarted { run_id, .. } => {
                // A fresh run resolves any stream the last disconnect
                // left dangling.
                if self.buffer.is_some() {
                    debug!(run_id, "Dropping stale streaming buffer on new run");
                }
                self.buffer = None;
                self.run_active = true;
                self.last_error = None;
            }
            EventPayload::Thinking { .. } => {}
            EventPayload::ArtifactStreamingStart {
                artifact_id,
                kind,
                language,
                title,
                is_update,
            } => {
                self.buffer = Some(StreamingBuffer {
                    artifact_id,
                    kind,
                    language,
                    title,
                    is_update,
                    text: String::new(),
                });
            }
            EventPayload::ArtifactStreaming { artifact_id, delta } => {
                match &mut self.buffer {
                    Some(buffer) if buffer.artifact_id == artifact_id => {
                        buffer.text.push_str(&delta);
                    }
                    // Mid-stream resumption without the START frame: the
                    // shell metadata is gone, so wait for the terminal
                    // event to materialize this cycle.
                    _ => debug!(artifact_id, "Delta without matching buffer; dropped"),
                }
            }
            EventPayload::ArtifactCreated {
                artifact_id,
                artifact,
            }
            | EventPayload::ArtifactUpdated {
                artifact_id,
                artifact,
            } => {
                self.artifacts.insert(artifact_id.clone(), artifact);
                if self
                    .buffer
                    .as_ref()
                    .is_some_and(|b| b.artifact_id == artifact_id)
                {
                    self.buffer = None;
                }
            }
            EventPayload::ArtifactVersionChanged {
                artifact_id,
                version,
            } => match self.artifacts.get_mut(&artifact_id) {
                Some(artifact) => {
                    if artifact.set_current(version).is_err() {
                        warn!(artifact_id, version, "Version change out of range; ignored");
                    }
                }
                None => warn!(artifact_id, "Version change for unknown artifact; ignored"),
            },
            EventPayload::RunFinished { .. } => {
                self.run_active = false;
                self.buffer = None;
            }
            EventPayload::Error { message } => {
                // Prior materialized artifacts stay as they were.
                warn!(%message, "Run failed");
                self.last_error = Some(message);
                self.buffer = None;
                self.run_active = false;
            }
            EventPayload::Custom { name, value } => {
                self.custom_events.push((name, value));
            }
        }
    }

    /// Apply a raw wire frame (one JSON event per frame).
    pub fn apply_frame(&mut self, frame: &str) -> Result<()> {
        let event: StreamEvent = serde_json::from_str(frame)?;
        self.apply(event);
        Ok(())
    }

    pub fn artifact(&self, artifact_id: &str) -> Option<&Artifact> {
        self.artifacts.get(artifact_id)
    }

    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn is_streaming(&self) -> bool {
        self.buffer.is_some()
    }

    pub fn is_run_active(&self) -> bool {
        self.run_active
    }

    /// The open cycle's buffer, if one is streaming.
    pub fn streaming_buffer(&self) -> Option<&StreamingBuffer> {
        self.buffer.as_ref()
    }

    /// The partial text accumulated so far in the open cycle.
    pub fn streaming_text(&self) -> Option<&str> {
        self.buffer.as_ref().map(|b| b.text.as_str())
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Take any CUSTOM events received since the last drain. Consumers
    /// dispatch on the event's `name`.
    pub fn drain_custom(&mut self) -> Vec<(String, serde_json::Value)> {
        std::mem::take(&mut self.custom_events)
    }
}
