//! Core types, config, and errors for the weave canvas backend.

pub mod artifact;
pub mod config;
pub mod error;
pub mod event;
pub mod protocol;

pub use artifact::{Artifact, ArtifactContent, ArtifactKind};
pub use error::{Result, WeaveError};
pub use event::{EventPayload, StreamEvent};
pub use protocol::{ArtifactRef, ChatMessage, RunRequest};
