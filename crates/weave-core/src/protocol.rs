//! Run request shapes — what a client sends to start a generation run.

use serde::{Deserialize, Serialize};

use crate::artifact::Artifact;

/// A chat message in the run request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Client -> server request to start an agent run against a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub messages: Vec<ChatMessage>,
    pub thread_id: String,
    pub run_id: String,

    /// Id of the cached artifact this run should update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<String>,

    /// Deprecated inline artifact fallback, kept for older clients.
    /// Ignored when `artifact_id` is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Artifact>,

    /// Text the user highlighted in the canvas, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

/// How a run refers to the artifact it operates on.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactRef {
    /// Look the artifact up in the cache by id.
    Cached(String),
    /// Deprecated inline fallback: the client sent the whole object.
    Inline(Box<Artifact>),
    /// No prior artifact; the run creates a new one.
    None,
}

impl RunRequest {
    /// Resolve which artifact this run targets. `artifact_id` takes
    /// priority over the inline `artifact` when both are present.
    pub fn artifact_ref(&self) -> ArtifactRef {
        if let Some(id) = &self.artifact_id {
            ArtifactRef::Cached(id.clone())
        } else if let Some(artifact) = &self.artifact {
            ArtifactRef::Inline(Box::new(artifact.clone()))
        } else {
            ArtifactRef::None
        }
    }
}
