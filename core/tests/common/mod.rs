//! Shared wiring for the core integration tests.

#![allow(dead_code)]

use raffle_core::config::CoreConfig;
use raffle_core::hub::LiveUpdateHub;
use raffle_core::lock::LockManager;
use raffle_core::mocks::{InMemoryLockStore, InMemoryStore, MockPaymentProvider, TestClock};
use raffle_core::payment::PaymentCoordinator;
use raffle_core::reservation::{CreateReservation, ReservationEngine};
use raffle_core::sweeper::ExpirationSweeper;
use raffle_core::types::{Money, NumberId, RaffleId, RaffleStatus, UserId};
use std::sync::Arc;

/// Every component of the core wired against the in-memory doubles.
pub struct World {
    pub store: Arc<InMemoryStore>,
    pub locks: Arc<InMemoryLockStore>,
    pub provider: Arc<MockPaymentProvider>,
    pub clock: Arc<TestClock>,
    pub hub: LiveUpdateHub,
    pub engine: Arc<ReservationEngine>,
    pub payments: Arc<PaymentCoordinator>,
    pub sweeper: ExpirationSweeper,
    pub config: CoreConfig,
}

impl World {
    pub fn new(config: CoreConfig) -> Self {
        let clock = Arc::new(TestClock::default());
        let store = Arc::new(InMemoryStore::new());
        let locks = Arc::new(InMemoryLockStore::with_clock(clock.clone()));
        let provider = Arc::new(MockPaymentProvider::new());
        let hub = LiveUpdateHub::new(1024);

        let engine = Arc::new(ReservationEngine::new(
            store.clone(),
            store.clone(),
            LockManager::new(locks.clone()),
            Arc::new(hub.clone()),
            clock.clone(),
            &config,
        ));
        let payments = Arc::new(PaymentCoordinator::new(
            engine.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            provider.clone(),
            &config,
        ));
        let sweeper = ExpirationSweeper::new(payments.clone(), store.clone(), config.sweeper.clone());

        Self {
            store,
            locks,
            provider,
            clock,
            hub,
            engine,
            payments,
            sweeper,
            config,
        }
    }

    pub fn raffle(&self, price_cents: i64, total: i32) -> RaffleId {
        self.store
            .add_raffle("Test raffle", RaffleStatus::Active, Money::from_cents(price_cents), total)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new(CoreConfig::default())
    }
}

pub fn request(raffle_id: RaffleId, user_id: UserId, numbers: &[i32], session: &str) -> CreateReservation {
    CreateReservation {
        raffle_id,
        user_id,
        number_ids: numbers.iter().copied().map(NumberId::new).collect(),
        session_id: session.to_string(),
    }
}

pub fn numbers(values: &[i32]) -> Vec<NumberId> {
    values.iter().copied().map(NumberId::new).collect()
}
