//! Redis-backed lock store for raffle numbers.
//!
//! # Architecture
//!
//! Each held number is one key, `raffle:lock:{raffle_id}:{number_id}`, whose value is
//! the holder's fencing token:
//!
//! - **Acquire**: `SET key token NX PX ttl`, atomic set-if-absent with expiry
//! - **Release / extend**: Lua scripts that compare the token before `DEL` / `PEXPIRE`,
//!   so a holder whose lock already expired cannot touch its successor's lock
//! - **Observe**: `EXISTS`
//!
//! Every failure to reach Redis surfaces as [`RaffleError::StoreUnavailable`].
//!
//! # Example
//!
//! ```no_run
//! use raffle_core::lock::LockManager;
//! use raffle_redis::RedisLockStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = RedisLockStore::new("redis://127.0.0.1:6379").await?;
//! let locks = LockManager::new(Arc::new(store));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use raffle_core::error::{RaffleError, Result};
use raffle_core::lock::LockStore;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::time::Duration;

const COMPARE_AND_DELETE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const COMPARE_AND_EXPIRE: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

fn unavailable(context: &str, err: &redis::RedisError) -> RaffleError {
    RaffleError::StoreUnavailable(format!("{context}: {err}"))
}

#[allow(clippy::cast_possible_truncation)] // lock TTLs are minutes, not centuries
fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// `Redis` lock store.
///
/// Clones share the same `ConnectionManager`, which reconnects on its own.
#[derive(Clone)]
pub struct RedisLockStore {
    conn_manager: ConnectionManager,
    compare_and_delete: Script,
    compare_and_expire: Script,
}

impl RedisLockStore {
    /// Connect to `redis_url`.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::StoreUnavailable`] if the URL is malformed or the
    /// server cannot be reached.
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| unavailable("invalid Redis URL", &e))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|e| unavailable("failed to connect to Redis", &e))?;

        tracing::info!("RedisLockStore initialized");
        Ok(Self::from_manager(conn_manager))
    }

    /// Wrap an existing connection manager.
    #[must_use]
    pub fn from_manager(conn_manager: ConnectionManager) -> Self {
        Self {
            conn_manager,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_expire: Script::new(COMPARE_AND_EXPIRE),
        }
    }

    /// `PING` the server; used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::StoreUnavailable`] if Redis does not answer.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("ping failed", &e))?;
        Ok(())
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        // SET NX replies OK when set and nil when the key exists.
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("lock acquire failed", &e))?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| unavailable("lock release failed", &e))?;
        Ok(deleted == 1)
    }

    async fn compare_and_expire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let extended: i64 = self
            .compare_and_expire
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| unavailable("lock extend failed", &e))?;
        Ok(extended == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let _: i64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("lock delete failed", &e))?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let count: i64 = redis::cmd("EXISTS")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| unavailable("lock lookup failed", &e))?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_is_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(300)), 300_000);
    }
}
