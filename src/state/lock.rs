//! State locking for concurrent access protection.
//!
//! Mutating runs hold a [`StateLock`] from before the snapshot is read until
//! after the last write. Acquisition is attempted once; a held lock is a
//! fatal error. While the run is in progress the lock is refreshed so it
//! never expires under its holder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::store::StateStore;
use crate::error::Result;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Interval between refreshes of a held lock.
pub const LOCK_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Refreshes the lock expiry time.
    pub fn refresh(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// A lock held by this process for the duration of a run.
#[derive(Debug)]
pub struct StateLock {
    info: LockInfo,
}

impl StateLock {
    /// Acquires the state lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is locked by someone else or the
    /// backend fails.
    pub async fn acquire<S: StateStore + ?Sized>(store: &S, holder: &str) -> Result<Self> {
        let info = store.lock_state(holder).await?;
        Ok(Self { info })
    }

    /// Refreshes the lock expiry in the backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock was lost or the backend fails.
    pub async fn refresh<S: StateStore + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.info = store.refresh_lock(&self.info.lock_id).await?;
        Ok(())
    }

    /// Drives `work` to completion, refreshing the lock every
    /// [`LOCK_REFRESH_INTERVAL`].
    pub async fn hold<S, F>(&mut self, store: &S, work: F) -> F::Output
    where
        S: StateStore + ?Sized,
        F: Future,
    {
        self.hold_with_interval(store, LOCK_REFRESH_INTERVAL, work).await
    }

    async fn hold_with_interval<S, F>(&mut self, store: &S, period: Duration, work: F) -> F::Output
    where
        S: StateStore + ?Sized,
        F: Future,
    {
        tokio::pin!(work);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                output = &mut work => return output,
                _ = ticker.tick() => {
                    match self.refresh(store).await {
                        Ok(()) => debug!("State lock {} valid until {}", self.info.lock_id, self.info.expires_at),
                        Err(e) => warn!("Failed to refresh state lock {}: {e}", self.info.lock_id),
                    }
                }
            }
        }
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub async fn release<S: StateStore + ?Sized>(self, store: &S) -> Result<()> {
        store.unlock_state(&self.info.lock_id).await
    }

    /// Releases the lock, logging instead of failing.
    pub async fn release_quietly<S: StateStore + ?Sized>(self, store: &S) {
        let lock_id = self.info.lock_id.clone();
        if let Err(e) = self.release(store).await {
            warn!("Failed to release state lock {lock_id}: {e}");
        }
    }

    /// Gets the lock ID.
    #[must_use]
    pub fn lock_id(&self) -> &str {
        &self.info.lock_id
    }

    /// Gets the lock holder.
    #[must_use]
    pub fn holder(&self) -> &str {
        &self.info.holder
    }

    /// Gets the lock info.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStateStore;
    use tempfile::TempDir;

    #[test]
    fn test_lock_info_creation() {
        let info = LockInfo::new("test-holder");
        assert_eq!(info.holder, "test-holder");
        assert!(!info.is_expired());
        assert!(info.remaining_secs() > 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);
        assert!(id1.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_lock_refresh() {
        let mut info = LockInfo::new("test-holder");
        let original_expires = info.expires_at;

        std::thread::sleep(std::time::Duration::from_millis(10));
        info.refresh();

        assert!(info.expires_at > original_expires);
    }

    #[tokio::test]
    async fn test_hold_refreshes_while_work_runs() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());

        let mut lock = StateLock::acquire(&store, "runner").await.expect("acquire");
        let acquired_expiry = lock.info().expires_at;

        let value = lock
            .hold_with_interval(&store, Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_millis(60)).await;
                42
            })
            .await;

        assert_eq!(value, 42);
        assert!(lock.info().expires_at > acquired_expiry);
        let saved = store.lock_info().await.expect("info").expect("locked");
        assert_eq!(saved.lock_id, lock.lock_id());
        assert_eq!(saved.expires_at, lock.info().expires_at);
        lock.release(&store).await.expect("release");
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp = TempDir::new().expect("temp dir");
        let store = LocalStateStore::with_base_dir(temp.path());

        let lock = StateLock::acquire(&store, "").await.expect("acquire");
        assert!(lock.holder().contains(&std::process::id().to_string()));
        assert!(store.is_locked().await.expect("is_locked"));
        assert!(StateLock::acquire(&store, "other").await.is_err());

        lock.release(&store).await.expect("release");
        assert!(!store.is_locked().await.expect("is_locked"));
    }
}
