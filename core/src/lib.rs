//! # Raffle Core
//!
//! Number reservation and payment lifecycle for online raffles.
//!
//! A buyer reserves numbers for a bounded window, pays through an external provider,
//! and ends up owning the numbers; otherwise the numbers return to the pool when the
//! reservation is cancelled or expires. The crate enforces:
//!
//! - at most one live reservation or owner per number, through short-lived
//!   [`lock`] entries backed by guarded writes in the [`repository`] layer
//! - reservation totals that equal price times count and match the payment amount
//! - idempotent transitions, so webhook redelivery, client retries, and the
//!   [`sweeper`] can race on the same reservation
//!
//! ## Layout
//!
//! - [`reservation::ReservationEngine`]: create, grow, confirm, cancel, expire
//! - [`payment::PaymentCoordinator`]: intents under idempotency keys, webhooks
//! - [`sweeper::ExpirationSweeper`]: background expiry and reconciliation
//! - [`hub::LiveUpdateHub`]: per-raffle fan-out of number state changes
//!
//! Storage, the lock store, and the payment provider sit behind traits; production
//! adapters live in `raffle-postgres`, `raffle-redis`, and `raffle-stripe`, and
//! in-memory versions in [`mocks`].
//!
//! ## Example
//!
//! ```
//! use raffle_core::config::CoreConfig;
//! use raffle_core::hub::LiveUpdateHub;
//! use raffle_core::lock::LockManager;
//! use raffle_core::mocks::{InMemoryLockStore, InMemoryStore, TestClock};
//! use raffle_core::reservation::{CreateReservation, ReservationEngine};
//! use raffle_core::types::{Money, NumberId, RaffleStatus, ReservationStatus, UserId};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryStore::new());
//! let raffle_id = store.add_raffle("Bike", RaffleStatus::Active, Money::from_cents(500), 100);
//! let engine = ReservationEngine::new(
//!     store.clone(),
//!     store.clone(),
//!     LockManager::new(Arc::new(InMemoryLockStore::new())),
//!     Arc::new(LiveUpdateHub::default()),
//!     Arc::new(TestClock::default()),
//!     &CoreConfig::default(),
//! );
//!
//! let reservation = engine
//!     .create(CreateReservation {
//!         raffle_id,
//!         user_id: UserId::new(),
//!         number_ids: vec![NumberId::new(7), NumberId::new(8)],
//!         session_id: "checkout-1".to_string(),
//!     })
//!     .await?;
//! assert_eq!(reservation.total_amount, Money::from_cents(1000));
//!
//! let confirmed = engine.confirm(reservation.id).await?;
//! assert_eq!(confirmed.status, ReservationStatus::Confirmed);
//! # Ok::<(), raffle_core::RaffleError>(())
//! # });
//! ```

pub mod config;
pub mod environment;
pub mod error;
pub mod hub;
pub mod lock;
pub mod payment;
pub mod provider;
pub mod repository;
pub mod reservation;
pub mod retry;
pub mod sweeper;
pub mod types;

/// In-memory implementations for tests and examples.
#[cfg(feature = "test-utils")]
pub mod mocks;

pub use error::{RaffleError, Result};
