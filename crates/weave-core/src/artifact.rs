//! Artifact model — versioned content objects produced by agent runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaveError};

/// What kind of content an artifact version holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Code,
    Text,
}

/// One immutable version of an artifact's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactContent {
    /// 1-based version index, ascending within [`Artifact::contents`].
    pub index: u32,
    pub kind: ArtifactKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    pub title: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A versioned content object owned by a thread.
///
/// `current_index` is a 1-based pointer into `contents` and always
/// indexes a valid element. Once appended, a version is never mutated;
/// edits land as new versions via [`Artifact::push_version`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub thread_id: String,
    pub current_index: u32,
    pub contents: Vec<ArtifactContent>,
}

impl ArtifactContent {
    pub fn new(
        kind: ArtifactKind,
        language: Option<String>,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            index: 1,
            kind,
            language,
            title: title.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }
}

impl Artifact {
    /// Create an artifact with a single initial version.
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>, mut content: ArtifactContent) -> Self {
        content.index = 1;
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            current_index: 1,
            contents: vec![content],
        }
    }

    /// The version `current_index` points at.
    pub fn current(&self) -> &ArtifactContent {
        // current_index is maintained as a valid 1-based pointer
        &self.contents[(self.current_index as usize).saturating_sub(1)]
    }

    /// Append a new version and move `current_index` to it.
    pub fn push_version(&mut self, mut content: ArtifactContent) {
        content.index = self.contents.len() as u32 + 1;
        self.contents.push(content);
        self.current_index = self.contents.len() as u32;
    }

    /// Point `current_index` at an existing version.
    pub fn set_current(&mut self, index: u32) -> Result<()> {
        if index == 0 || index as usize > self.contents.len() {
            return Err(WeaveError::Broker(format!(
                "version {index} out of range for artifact {} ({} versions)",
                self.id,
                self.contents.len()
            )));
        }
        self.current_index = index;
        Ok(())
    }

    pub fn version_count(&self) -> u32 {
        self.contents.len() as u32
    }
}
