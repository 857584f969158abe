//! Background expiry of overdue reservations.
//!
//! Each tick takes a batch of pending reservations whose window has elapsed, gives the
//! payment provider one last chance to report a success, and expires the rest. Every
//! step is idempotent, so several sweeper instances may run against the same store.

use crate::config::SweeperConfig;
use crate::environment::Clock;
use crate::error::{RaffleError, Result};
use crate::payment::PaymentCoordinator;
use crate::repository::IdempotencyRepository;
use crate::types::Reservation;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

/// Counts from one sweeper tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Reservations moved to `expired`
    pub expired: usize,
    /// Overdue reservations confirmed because their payment had succeeded
    pub confirmed: usize,
    /// Reservations that could not be processed this tick
    pub failed: usize,
    /// Number rows whose owner was re-applied
    pub repaired: u64,
    /// Expired idempotency rows deleted
    pub purged: u64,
}

impl SweepReport {
    /// Whether the tick did anything worth logging.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.expired == 0
            && self.confirmed == 0
            && self.failed == 0
            && self.repaired == 0
            && self.purged == 0
    }
}

/// Expiration sweeper.
pub struct ExpirationSweeper {
    payments: Arc<PaymentCoordinator>,
    idempotency: Arc<dyn IdempotencyRepository>,
    clock: Arc<dyn Clock>,
    config: SweeperConfig,
}

impl ExpirationSweeper {
    /// Assemble a sweeper.
    #[must_use]
    pub fn new(
        payments: Arc<PaymentCoordinator>,
        idempotency: Arc<dyn IdempotencyRepository>,
        config: SweeperConfig,
    ) -> Self {
        let clock = Arc::clone(payments.engine().clock());
        Self {
            payments,
            idempotency,
            clock,
            config,
        }
    }

    /// Tick every `interval` until `shutdown` flips to `true`.
    ///
    /// A failing tick is logged and the loop carries on.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_ms = self.config.interval.as_millis(),
            batch_size = self.config.batch_size,
            "Starting expiration sweeper"
        );

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(report) if report.is_empty() => {}
                        Ok(report) => tracing::info!(?report, "Sweep finished"),
                        Err(e) => tracing::error!(error = %e, "Sweep failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Expiration sweeper stopped");
    }

    /// Run one sweep.
    ///
    /// Work that does not fit in the configured budget is left for the next tick.
    ///
    /// # Errors
    ///
    /// Returns an error only if the overdue batch cannot be listed; failures on single
    /// reservations are counted in [`SweepReport::failed`].
    #[tracing::instrument(skip(self))]
    pub async fn tick(&self) -> Result<SweepReport> {
        let deadline = Instant::now() + self.config.budget;
        let mut report = SweepReport::default();
        let engine = self.payments.engine();

        let overdue = engine.list_overdue(self.config.batch_size).await?;
        for reservation in &overdue {
            let step = tokio::time::timeout_at(deadline, self.settle(reservation)).await;
            match step {
                Ok(Ok(Settled::Expired)) => report.expired += 1,
                Ok(Ok(Settled::Confirmed)) => report.confirmed += 1,
                Ok(Ok(Settled::Skipped)) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    tracing::warn!(reservation_id = %reservation.id, error = %e, "Failed to settle overdue reservation");
                }
                Err(_) => {
                    tracing::warn!(
                        remaining = overdue.len() - report.expired - report.confirmed - report.failed,
                        "Sweep budget exhausted"
                    );
                    break;
                }
            }
        }

        if Instant::now() < deadline {
            match engine.repair_owners(self.config.batch_size).await {
                Ok(repaired) => report.repaired = repaired,
                Err(e) => tracing::warn!(error = %e, "Owner repair failed"),
            }
            match self.idempotency.purge_expired(self.clock.now()).await {
                Ok(purged) => report.purged = purged,
                Err(e) => tracing::warn!(error = %e, "Idempotency purge failed"),
            }
        }

        metrics::counter!("raffle_sweeper_expired_total").increment(report.expired as u64);
        metrics::counter!("raffle_sweeper_failures_total").increment(report.failed as u64);
        Ok(report)
    }

    async fn settle(&self, reservation: &Reservation) -> Result<Settled> {
        if self.payments.settle_overdue(reservation.id).await? {
            return Ok(Settled::Confirmed);
        }
        match self.payments.engine().expire(reservation.id).await {
            Ok(_) => {}
            // Someone else finished it first.
            Err(
                RaffleError::AlreadyConfirmed
                | RaffleError::ReservationExpired
                | RaffleError::InvalidTransition(_),
            ) => {
                return Ok(Settled::Skipped);
            }
            Err(e) => return Err(e),
        }
        self.payments
            .cancel_for_reservation(reservation.id, "reservation expired")
            .await?;
        Ok(Settled::Expired)
    }
}

enum Settled {
    Expired,
    Confirmed,
    Skipped,
}
