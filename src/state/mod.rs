//! State management module for deckhand.
//!
//! This module persists the remote state snapshot: the last-confirmed
//! remote id, recorded attributes and outputs of every managed resource,
//! plus the lineage/serial pair used for stale-plan detection.

mod store;
mod local;
mod s3;
mod lock;
mod types;

pub use store::{StateStore, load_or_init};
pub use local::{LocalStateStore, STATE_DIR};
pub use s3::S3StateStore;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, StateLock, generate_holder_id};
pub use types::{HistoryEntry, MAX_HISTORY, ResourceState, RunKind, STATE_VERSION, Snapshot};
