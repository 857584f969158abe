//! `PostgreSQL` repositories for the raffle reservation core.
//!
//! [`PostgresStore`] implements every repository contract from `raffle-core` over a
//! single sqlx connection pool:
//!
//! - raffles and their number pools ([`raffle_core::repository::RaffleRepository`])
//! - reservations with status-guarded transitions
//!   ([`raffle_core::repository::ReservationRepository`])
//! - payments ([`raffle_core::repository::PaymentRepository`])
//! - idempotency keys ([`raffle_core::repository::IdempotencyRepository`])
//!
//! Every transition is a single `UPDATE ... WHERE status = $expected`, so concurrent
//! writers serialize on the row. Confirmation touches the reservation, its numbers,
//! and the raffle counter inside one transaction.
//!
//! # Example
//!
//! ```no_run
//! use raffle_postgres::PostgresStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = PostgresStore::connect("postgres://localhost/raffle").await?;
//! store.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod idempotency;
mod payments;
mod raffles;
mod reservations;
mod rows;

use raffle_core::error::{RaffleError, Result};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Embedded schema migrations.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Pool settings for [`PostgresStore::connect_with`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum pooled connections
    pub max_connections: u32,
    /// Connections kept open when idle
    pub min_connections: u32,
    /// Time allowed to establish a connection
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// `PostgreSQL`-backed store for raffles, reservations, payments, and idempotency keys.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with default pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::StoreUnavailable`] if the database cannot be reached.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, &PoolConfig::default()).await
    }

    /// Connect with explicit pool settings.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::StoreUnavailable`] if the database cannot be reached.
    pub async fn connect_with(database_url: &str, config: &PoolConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout)
            .connect(database_url)
            .await
            .map_err(|e| RaffleError::StoreUnavailable(format!("database connect failed: {e}")))?;

        tracing::info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| RaffleError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Round-trip a trivial query; used by readiness checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the database does not answer.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(rows::db_error)?;
        Ok(())
    }
}
