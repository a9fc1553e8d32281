//! State store trait definition.
//!
//! This module defines the common interface for state storage backends. A
//! backend moves the serialized snapshot as one opaque string and guards it
//! with a lock record; it never interprets the document.

use async_trait::async_trait;

use super::lock::LockInfo;
use crate::error::Result;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the serialized state document.
    ///
    /// Returns `None` if no state exists yet.
    async fn read_state(&self) -> Result<Option<String>>;

    /// Replaces the serialized state document.
    async fn write_state(&self, content: &str) -> Result<()>;

    /// Deletes the state document and any lock.
    async fn delete_state(&self) -> Result<()>;

    /// Checks if state exists.
    async fn exists(&self) -> Result<bool>;

    /// Acquires a lock on the state.
    ///
    /// An empty holder is replaced by a generated holder id.
    async fn lock_state(&self, holder: &str) -> Result<LockInfo>;

    /// Pushes back the expiry of the lock identified by `lock_id`.
    ///
    /// Fails if the lock is gone or now belongs to someone else.
    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo>;

    /// Releases a lock on the state.
    ///
    /// Fails without touching the lock if `lock_id` does not own it.
    async fn unlock_state(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked by an unexpired lock.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Human-readable location of the state document.
    fn location(&self) -> String;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn read_state(&self) -> Result<Option<String>> {
        (**self).read_state().await
    }

    async fn write_state(&self, content: &str) -> Result<()> {
        (**self).write_state(content).await
    }

    async fn delete_state(&self) -> Result<()> {
        (**self).delete_state().await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn lock_state(&self, holder: &str) -> Result<LockInfo> {
        (**self).lock_state(holder).await
    }

    async fn refresh_lock(&self, lock_id: &str) -> Result<LockInfo> {
        (**self).refresh_lock(lock_id).await
    }

    async fn unlock_state(&self, lock_id: &str) -> Result<()> {
        (**self).unlock_state(lock_id).await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }

    fn location(&self) -> String {
        (**self).location()
    }
}
