//! Persistence: one serialized snapshot of the whole state tree under a fixed
//! storage key.
//!
//! # Invariants
//! - The storage key is written only by the bridge.
//! - Storage and serialization failures are logged, never propagated to
//!   `commit`/`dispatch` callers, and never roll back in-memory state.
//! - Rehydration merges by top-level key; it does not replace the default shape.

mod bridge;
mod storage;

pub use bridge::{DEFAULT_STORAGE_KEY, PersistenceBridge, merge_snapshot};
pub use storage::{DurableStorage, FileStorage, MemoryStorage, StorageError};
