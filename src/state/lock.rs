//! State locking for concurrent access protection.
//!
//! Commands that write the snapshot hold the lock for their whole run, so
//! two processes never apply against the same snapshot at once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

use super::store::StateStore;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300; // 5 minutes

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// Command holding the lock.
    #[serde(default)]
    pub operation: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

/// A lock held by this process.
///
/// Release it explicitly with [`StateLock::release`]; an unreleased lock
/// expires after [`LOCK_EXPIRY_SECS`].
#[derive(Debug)]
#[must_use = "a state lock should be released when the command finishes"]
pub struct StateLock {
    /// Lock information.
    info: LockInfo,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str, operation: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            operation: operation.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Restarts the expiry window from now.
    pub fn renew(&mut self) {
        self.expires_at = Utc::now() + chrono::Duration::seconds(LOCK_EXPIRY_SECS);
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

impl StateLock {
    /// Acquires the state lock for `operation`.
    ///
    /// # Errors
    ///
    /// Returns `LockedByOther` if another process holds an unexpired lock.
    pub async fn acquire(store: &dyn StateStore, operation: &str) -> Result<Self> {
        let info = store
            .acquire_lock(&generate_holder_id(), operation)
            .await?;
        Ok(Self { info })
    }

    /// Gets the lock ID.
    #[must_use]
    pub fn lock_id(&self) -> &str {
        &self.info.lock_id
    }

    /// Renews the lock in `store`.
    ///
    /// # Errors
    ///
    /// Returns `StateError::LockLost` if the lock expired and was taken over.
    pub async fn renew(&mut self, store: &dyn StateStore) -> Result<()> {
        self.info = store.renew_lock(&self.info.lock_id).await?;
        Ok(())
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot remove the lock.
    pub async fn release(self, store: &dyn StateStore) -> Result<()> {
        store.release_lock(&self.info.lock_id).await
    }

    /// Releases the lock, logging instead of failing.
    pub async fn release_quietly(self, store: &dyn StateStore) {
        let lock_id = self.info.lock_id.clone();
        if let Err(e) = self.release(store).await {
            warn!("Failed to release state lock {lock_id}: {e}");
        }
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get()
        .map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = Uuid::new_v4().simple().to_string();

    format!("{hostname}-{pid}-{}", &uuid[..8])
}
