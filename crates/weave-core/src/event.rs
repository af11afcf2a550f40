//! Streaming wire protocol — one typed event per frame.
//!
//! Events for one run are strictly ordered at emission and the transport
//! must preserve that order. Consumers must tolerate duplicate redelivery
//! after a reconnect; terminal artifact events carry the full authoritative
//! payload so re-applying them is a no-op.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::artifact::{Artifact, ArtifactKind};

/// A wire frame: `{ "type": ..., "data": ..., "timestamp": epoch-millis }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    /// Emission time in epoch milliseconds.
    pub timestamp: i64,
}

/// The typed event payload. Artifact-related events always carry
/// `artifact_id` in their data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    RunStarted {
        run_id: String,
        thread_id: String,
    },
    Thinking {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
    /// Opens an artifact cycle. The id is emitted here, before the final
    /// object exists, so a client can begin buffering immediately.
    ArtifactStreamingStart {
        artifact_id: String,
        kind: ArtifactKind,
        #[serde(skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        title: String,
        /// True when this cycle updates an existing artifact.
        is_update: bool,
    },
    ArtifactStreaming {
        artifact_id: String,
        delta: String,
    },
    /// Terminal event of a create cycle, carrying the full artifact.
    ArtifactCreated {
        artifact_id: String,
        artifact: Artifact,
    },
    /// Terminal event of an update cycle, carrying the full artifact.
    ArtifactUpdated {
        artifact_id: String,
        artifact: Artifact,
    },
    ArtifactVersionChanged {
        artifact_id: String,
        version: u32,
    },
    RunFinished {
        run_id: String,
    },
    Error {
        message: String,
    },
    /// Application-defined event; consumers dispatch on `name`.
    Custom {
        name: String,
        value: serde_json::Value,
    },
}

impl StreamEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// The artifact id carried in the payload, if this is an artifact event.
    pub fn artifact_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::ArtifactStreamingStart { artifact_id, .. }
            | EventPayload::ArtifactStreaming { artifact_id, .. }
            | EventPayload::ArtifactCreated { artifact_id, .. }
            | EventPayload::ArtifactUpdated { artifact_id, .. }
            | EventPayload::ArtifactVersionChanged { artifact_id, .. } => Some(artifact_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Artifact, ArtifactContent};

    #[test]
    fn test_wire_shape() {
        let event = StreamEvent::new(EventPayload::ArtifactStreaming {
            artifact_id: "a1".into(),
            delta: "fn main".into(),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "ARTIFACT_STREAMING");
        assert_eq!(value["data"]["artifact_id"], "a1");
        assert_eq!(value["data"]["delta"], "fn main");
        assert!(value["timestamp"].is_i64());
    }

    #[test]
    fn test_custom_carries_name_discriminator() {
        let event = StreamEvent::new(EventPayload::Custom {
            name: "selection_changed".into(),
            value: serde_json::json!({ "start": 3 }),
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "CUSTOM");
        assert_eq!(value["data"]["name"], "selection_changed");
        assert_eq!(value["data"]["value"]["start"], 3);
    }

    #[test]
    fn test_roundtrip_terminal_event() {
        let artifact = Artifact::new(
            "a1",
            "t1",
            ArtifactContent::new(ArtifactKind::Text, None, "notes", "hello"),
        );
        let event = StreamEvent::new(EventPayload::ArtifactCreated {
            artifact_id: artifact.id.clone(),
            artifact,
        });
        let json = serde_json::to_string(&event).unwrap();
        let back: StreamEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.artifact_id(), Some("a1"));
        match back.payload {
            EventPayload::ArtifactCreated { artifact, .. } => {
                assert_eq!(artifact.current().body, "hello")
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }
}
