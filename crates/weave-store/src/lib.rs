//! Concurrent TTL artifact cache and version ledger.
//!
//! One [`ArtifactStore`] instance is shared by every in-flight run.
//! Operations on the same artifact id are serialized through a per-entry
//! mutex; unrelated ids never block each other.

pub mod store;

pub use store::{ArtifactStore, StoreStats};
