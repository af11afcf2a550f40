//! Local-first thread/message persistence with best-effort remote
//! mirroring.
//!
//! User actions commit to a fast local JSONL store synchronously; the
//! equivalent remote call runs as a detached background task. Remote
//! failures are logged and discarded, never retried, never surfaced, and
//! never roll back the local write.

pub mod local;
pub mod reconciler;
pub mod remote;

pub use local::{JsonlThreadStore, MessageRecord, ThreadRecord};
pub use reconciler::SyncReconciler;
pub use remote::{HttpRemote, RemoteApi};
