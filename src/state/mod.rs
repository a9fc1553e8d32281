//! State management module for Stackforge.
//!
//! This module provides the persisted project snapshot and the storage
//! backends it is read from and written to.

mod local;
mod lock;
mod s3;
mod store;
mod types;

pub use local::{LocalStateStore, STATE_DIR};
pub use lock::{generate_holder_id, LockInfo, StateLock, LOCK_EXPIRY_SECS};
pub use s3::S3StateStore;
pub use store::StateStore;
pub use types::{RunHistoryEntry, RunOperation, StateSnapshot, MAX_HISTORY, STATE_VERSION};
