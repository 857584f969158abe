//! Per-number distributed locks.
//!
//! A number is held by at most one reservation at a time. Each lock lives under the key
//! `raffle:lock:{raffle_id}:{number_id}` in a shared key-value store and carries a random
//! token; only the holder of the token may extend or release it. Locks expire on their
//! own after their TTL, so a crashed holder never blocks a number forever.
//!
//! # Example
//!
//! ```
//! use raffle_core::lock::{Acquisition, LockKey, LockManager};
//! use raffle_core::mocks::InMemoryLockStore;
//! use raffle_core::types::{NumberId, RaffleId};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let locks = LockManager::new(Arc::new(InMemoryLockStore::new()));
//! let key = LockKey::new(RaffleId::new(), NumberId::new(7));
//!
//! let Acquisition::Acquired(lock) = locks.acquire(key, Duration::from_secs(300)).await? else {
//!     unreachable!("fresh store");
//! };
//! assert!(matches!(
//!     locks.acquire(key, Duration::from_secs(300)).await?,
//!     Acquisition::AlreadyHeld(_)
//! ));
//! assert!(locks.release(&lock).await?);
//! # Ok::<(), raffle_core::RaffleError>(())
//! # });
//! ```

use crate::error::Result;
use crate::types::{NumberId, RaffleId};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Atomic primitives a lock backend must provide.
///
/// All failures are reported as [`crate::RaffleError::StoreUnavailable`].
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Set `key = token` with `ttl` only if `key` is absent; `true` when set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it still holds `token`; `true` when deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool>;

    /// Reset the TTL of `key` only if it still holds `token`; `true` when extended.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` regardless of its value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Whether `key` is currently held.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn exists(&self, key: &str) -> Result<bool>;
}

/// Identity of a lockable number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockKey {
    /// Raffle of the number
    pub raffle_id: RaffleId,
    /// The number
    pub number_id: NumberId,
}

impl LockKey {
    /// Creates a lock key
    #[must_use]
    pub const fn new(raffle_id: RaffleId, number_id: NumberId) -> Self {
        Self {
            raffle_id,
            number_id,
        }
    }

    /// Key under which the lock is stored.
    #[must_use]
    pub fn storage_key(&self) -> String {
        format!("raffle:lock:{}:{}", self.raffle_id, self.number_id)
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.raffle_id, self.number_id)
    }
}

/// A held lock. Only the token proves ownership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock {
    /// Locked number
    pub key: LockKey,
    /// Random ownership token
    pub token: String,
    /// TTL the lock was taken or last extended with
    pub ttl: Duration,
}

/// Outcome of an acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Acquisition<T> {
    /// Every requested lock is now held
    Acquired(T),
    /// This key is held by someone else; nothing remains held by the attempt
    AlreadyHeld(LockKey),
}

/// Lock manager on top of a [`LockStore`].
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    /// Create a manager over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Take the lock on a single number.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::StoreUnavailable`] if the store cannot be reached.
    pub async fn acquire(&self, key: LockKey, ttl: Duration) -> Result<Acquisition<Lock>> {
        let token = Uuid::new_v4().simple().to_string();
        if self
            .store
            .set_if_absent(&key.storage_key(), &token, ttl)
            .await?
        {
            tracing::debug!(lock = %key, ttl_ms = ttl.as_millis(), "Lock acquired");
            Ok(Acquisition::Acquired(Lock { key, token, ttl }))
        } else {
            tracing::debug!(lock = %key, "Lock already held");
            Ok(Acquisition::AlreadyHeld(key))
        }
    }

    /// Take locks on all `keys`, in order.
    ///
    /// On the first conflict every lock taken so far is released and the conflicting
    /// key is returned. A store failure part-way through releases what was taken
    /// and propagates the error.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::StoreUnavailable`] if the store cannot be reached.
    pub async fn acquire_all(
        &self,
        keys: &[LockKey],
        ttl: Duration,
    ) -> Result<Acquisition<Vec<Lock>>> {
        let mut held = Vec::with_capacity(keys.len());

        for key in keys {
            match self.acquire(*key, ttl).await {
                Ok(Acquisition::Acquired(lock)) => held.push(lock),
                Ok(Acquisition::AlreadyHeld(conflict)) => {
                    self.release_all(&held).await;
                    return Ok(Acquisition::AlreadyHeld(conflict));
                }
                Err(e) => {
                    self.release_all(&held).await;
                    return Err(e);
                }
            }
        }

        Ok(Acquisition::Acquired(held))
    }

    /// Release a lock if it is still ours; `false` when it expired or changed hands.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::StoreUnavailable`] if the store cannot be reached.
    pub async fn release(&self, lock: &Lock) -> Result<bool> {
        let released = self
            .store
            .compare_and_delete(&lock.key.storage_key(), &lock.token)
            .await?;
        if !released {
            tracing::debug!(lock = %lock.key, "Lock no longer held by this token");
        }
        Ok(released)
    }

    /// Best-effort release of several locks; failures are logged.
    pub async fn release_all(&self, locks: &[Lock]) {
        for lock in locks {
            if let Err(e) = self.release(lock).await {
                tracing::warn!(lock = %lock.key, error = %e, "Failed to release lock");
            }
        }
    }

    /// Reset the TTL of a lock we still hold; `false` when it is no longer ours.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::StoreUnavailable`] if the store cannot be reached.
    pub async fn extend(&self, lock: &Lock, ttl: Duration) -> Result<bool> {
        self.store
            .compare_and_expire(&lock.key.storage_key(), &lock.token, ttl)
            .await
    }

    /// Delete a lock without checking the token.
    ///
    /// Used when the reservation that held the number reached a terminal state and
    /// the token is no longer known.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::StoreUnavailable`] if the store cannot be reached.
    pub async fn force_release(&self, key: LockKey) -> Result<()> {
        self.store.delete(&key.storage_key()).await
    }

    /// Whether a number is currently locked.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::StoreUnavailable`] if the store cannot be reached.
    pub async fn is_locked(&self, key: LockKey) -> Result<bool> {
        self.store.exists(&key.storage_key()).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::mocks::InMemoryLockStore;

    const TTL: Duration = Duration::from_secs(300);

    fn keys(raffle: RaffleId, numbers: &[i32]) -> Vec<LockKey> {
        numbers
            .iter()
            .map(|n| LockKey::new(raffle, NumberId::new(*n)))
            .collect()
    }

    #[test]
    fn storage_key_format() {
        let raffle = RaffleId::new();
        let key = LockKey::new(raffle, NumberId::new(42));
        assert_eq!(key.storage_key(), format!("raffle:lock:{raffle}:42"));
    }

    #[tokio::test]
    async fn acquire_all_is_all_or_nothing() {
        let store = Arc::new(InMemoryLockStore::new());
        let locks = LockManager::new(store.clone());
        let raffle = RaffleId::new();

        let taken = locks
            .acquire(LockKey::new(raffle, NumberId::new(3)), TTL)
            .await
            .unwrap();
        assert!(matches!(taken, Acquisition::Acquired(_)));

        let outcome = locks.acquire_all(&keys(raffle, &[1, 2, 3, 4]), TTL).await.unwrap();
        assert_eq!(
            outcome,
            Acquisition::AlreadyHeld(LockKey::new(raffle, NumberId::new(3)))
        );

        // 1 and 2 were rolled back, 4 was never attempted
        for n in [1, 2, 4] {
            assert!(!locks.is_locked(LockKey::new(raffle, NumberId::new(n))).await.unwrap());
        }
        assert!(locks.is_locked(LockKey::new(raffle, NumberId::new(3))).await.unwrap());
    }

    #[tokio::test]
    async fn release_requires_matching_token() {
        let store = Arc::new(InMemoryLockStore::new());
        let locks = LockManager::new(store.clone());
        let key = LockKey::new(RaffleId::new(), NumberId::new(9));

        let Acquisition::Acquired(lock) = locks.acquire(key, TTL).await.unwrap() else {
            panic!("expected lock");
        };
        let stranger = Lock {
            token: "not-the-token".to_string(),
            ..lock.clone()
        };

        assert!(!locks.release(&stranger).await.unwrap());
        assert!(!locks.extend(&stranger, TTL).await.unwrap());
        assert!(locks.is_locked(key).await.unwrap());

        assert!(locks.extend(&lock, TTL).await.unwrap());
        assert!(locks.release(&lock).await.unwrap());
        assert!(!locks.is_locked(key).await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_rolls_back_and_propagates() {
        let store = Arc::new(InMemoryLockStore::new());
        let locks = LockManager::new(store.clone());
        let raffle = RaffleId::new();

        store.fail_acquisitions_after(2);
        let result = locks.acquire_all(&keys(raffle, &[1, 2, 3]), TTL).await;
        assert!(matches!(result, Err(crate::RaffleError::StoreUnavailable(_))));

        store.recover();
        for n in [1, 2, 3] {
            assert!(!locks.is_locked(LockKey::new(raffle, NumberId::new(n))).await.unwrap());
        }
    }
}
