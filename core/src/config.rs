//! Tunables for the reservation core.
//!
//! The core never reads the environment itself; the server builds a [`CoreConfig`]
//! from its own configuration layer and hands it down.

use std::time::Duration;

/// Reservation, payment, and sweeper settings.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// How long a pending reservation holds its numbers
    pub reservation_window: Duration,
    /// TTL applied to each number lock; should equal the window
    pub lock_ttl: Duration,
    /// Retention of idempotency rows
    pub idempotency_ttl: Duration,
    /// ISO currency for new payment intents
    pub currency: String,
    /// Deadline for a single provider call
    pub provider_timeout: Duration,
    /// Sweeper settings
    pub sweeper: SweeperConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            reservation_window: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(300),
            idempotency_ttl: Duration::from_secs(86_400),
            currency: "usd".to_string(),
            provider_timeout: Duration::from_secs(5),
            sweeper: SweeperConfig::default(),
        }
    }
}

/// Expiration sweeper settings.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// Time between ticks
    pub interval: Duration,
    /// Wall-clock budget per tick; should stay below `interval`
    pub budget: Duration,
    /// Maximum overdue reservations handled per tick
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            budget: Duration::from_secs(25),
            batch_size: 100,
        }
    }
}
