//! Reservation engine: creation, growth, confirmation, cancellation, and expiry.
//!
//! The engine combines three sources of truth:
//!
//! - number locks in the [`LockManager`] decide who may *start* holding a number,
//! - the [`ReservationRepository`] is authoritative for reservation status,
//! - the raffle's number rows record hold markers and, once sold, the owner.
//!
//! Every status change is a guarded `pending → X` write. Repeating a transition that
//! already reached its destination is a no-op, so webhooks, the sweeper, and clients can
//! all race on the same reservation safely.

use crate::config::CoreConfig;
use crate::environment::{Clock, add_duration};
use crate::error::{RaffleError, Result};
use crate::hub::{LiveEvent, LivePublisher, ReleaseReason};
use crate::lock::{Acquisition, LockKey, LockManager};
use crate::repository::{RaffleRepository, ReservationRepository};
use crate::types::{
    Money, NumberId, RaffleId, Reservation, ReservationId, ReservationStatus, UserId,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Input of [`ReservationEngine::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReservation {
    /// Raffle to reserve in
    pub raffle_id: RaffleId,
    /// Buyer
    pub user_id: UserId,
    /// Numbers to hold, unique
    pub number_ids: Vec<NumberId>,
    /// Client correlation key; retries with the same key return the same reservation
    pub session_id: String,
}

/// Reservation engine.
#[derive(Clone)]
pub struct ReservationEngine {
    raffles: Arc<dyn RaffleRepository>,
    reservations: Arc<dyn ReservationRepository>,
    locks: LockManager,
    publisher: Arc<dyn LivePublisher>,
    clock: Arc<dyn Clock>,
    window: Duration,
    lock_ttl: Duration,
}

impl ReservationEngine {
    /// Assemble an engine.
    #[must_use]
    pub fn new(
        raffles: Arc<dyn RaffleRepository>,
        reservations: Arc<dyn ReservationRepository>,
        locks: LockManager,
        publisher: Arc<dyn LivePublisher>,
        clock: Arc<dyn Clock>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            raffles,
            reservations,
            locks,
            publisher,
            clock,
            window: config.reservation_window,
            lock_ttl: config.lock_ttl,
        }
    }

    /// The clock the engine runs on.
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    // ═══════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════

    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::NotFound`] if it does not exist.
    pub async fn get(&self, id: ReservationId) -> Result<Reservation> {
        self.reservations
            .get_reservation(id)
            .await?
            .ok_or_else(|| RaffleError::not_found("reservation", id))
    }

    /// Load a reservation on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RaffleError::NotFound`] if it does not exist and
    /// [`RaffleError::Forbidden`] if it belongs to someone else.
    pub async fn get_owned(&self, id: ReservationId, user_id: UserId) -> Result<Reservation> {
        let reservation = self.get(id).await?;
        if reservation.user_id != user_id {
            return Err(RaffleError::Forbidden(format!(
                "reservation {id} belongs to another user"
            )));
        }
        Ok(reservation)
    }

    /// All reservations of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_for_user(&self, user_id: UserId) -> Result<Vec<Reservation>> {
        self.reservations.list_reservations_by_user(user_id).await
    }

    /// The user's live pending reservation in a raffle, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn get_active(
        &self,
        user_id: UserId,
        raffle_id: RaffleId,
    ) -> Result<Option<Reservation>> {
        self.reservations
            .find_active(user_id, raffle_id, self.clock.now())
            .await
    }

    // ═══════════════════════════════════════════════════════════
    // Create
    // ═══════════════════════════════════════════════════════════

    /// Create a pending reservation holding `request.number_ids`.
    ///
    /// Retrying with the same `session_id` while the first reservation is still live
    /// returns that reservation instead of creating another one.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::NoNumbersSelected`] / [`RaffleError::InvalidInput`] for bad input
    /// - [`RaffleError::NotFound`] / [`RaffleError::RaffleNotActive`] for the raffle
    /// - [`RaffleError::NumbersUnavailable`] when any number is held, sold, or missing
    /// - [`RaffleError::StoreUnavailable`] when the lock store cannot be reached
    #[tracing::instrument(skip(self, request), fields(raffle_id = %request.raffle_id, user_id = %request.user_id, count = request.number_ids.len()))]
    pub async fn create(&self, request: CreateReservation) -> Result<Reservation> {
        validate_request(&request)?;
        let now = self.clock.now();

        if let Some(existing) = self
            .reservations
            .find_by_session(request.user_id, &request.session_id)
            .await?
        {
            if existing.raffle_id == request.raffle_id && existing.is_live(now) {
                tracing::debug!(reservation_id = %existing.id, "Returning reservation for repeated session");
                return Ok(existing);
            }
            if existing.status == ReservationStatus::Pending && !existing.is_past_window(now) {
                return Err(RaffleError::InvalidInput(
                    "session_id is already used by another reservation".to_string(),
                ));
            }
        }

        let raffle = self
            .raffles
            .get_raffle(request.raffle_id)
            .await?
            .ok_or_else(|| RaffleError::not_found("raffle", request.raffle_id))?;
        if !raffle.is_active() {
            return Err(RaffleError::RaffleNotActive);
        }

        let count = i64::try_from(request.number_ids.len())
            .map_err(|_| RaffleError::InvalidInput("too many numbers".to_string()))?;
        let total_amount = raffle
            .price_per_number
            .checked_mul(count)
            .filter(Money::is_positive)
            .ok_or_else(|| {
                RaffleError::InvalidAmount(format!(
                    "{count} x {} is not a positive amount",
                    raffle.price_per_number
                ))
            })?;

        let unavailable = self
            .raffles
            .unavailable_numbers(request.raffle_id, &request.number_ids)
            .await?;
        if !unavailable.is_empty() {
            return Err(RaffleError::NumbersUnavailable {
                numbers: unavailable,
            });
        }

        let keys: Vec<LockKey> = request
            .number_ids
            .iter()
            .map(|n| LockKey::new(request.raffle_id, *n))
            .collect();
        let locks = match self.locks.acquire_all(&keys, self.lock_ttl).await? {
            Acquisition::Acquired(locks) => locks,
            Acquisition::AlreadyHeld(conflict) => {
                metrics::counter!("raffle_lock_conflicts_total").increment(1);
                tracing::info!(number_id = %conflict.number_id, "Number already locked");
                return Err(RaffleError::NumbersUnavailable {
                    numbers: vec![conflict.number_id],
                });
            }
        };

        match self.persist_new(&request, total_amount).await {
            Ok(reservation) => {
                metrics::counter!("raffle_reservations_created_total").increment(1);
                tracing::info!(
                    reservation_id = %reservation.id,
                    total = %reservation.total_amount,
                    expires_at = %reservation.expires_at,
                    "Reservation created"
                );
                for number_id in &reservation.number_ids {
                    self.publisher.publish(LiveEvent::NumberReserved {
                        raffle_id: reservation.raffle_id,
                        reservation_id: reservation.id,
                        number_id: *number_id,
                        user_id: reservation.user_id,
                    });
                }
                Ok(reservation)
            }
            Err(e) => {
                self.locks.release_all(&locks).await;
                Err(e)
            }
        }
    }

    async fn persist_new(
        &self,
        request: &CreateReservation,
        total_amount: Money,
    ) -> Result<Reservation> {
        // Locks may have been left behind by a reservation that was already confirmed
        // or is still pending past its window; the reservation table decides.
        let overlapping = self
            .reservations
            .count_overlapping(request.raffle_id, &request.number_ids)
            .await?;
        if overlapping > 0 {
            metrics::counter!("raffle_lock_conflicts_total").increment(1);
            return Err(RaffleError::NumbersUnavailable {
                numbers: request.number_ids.clone(),
            });
        }

        let now = self.clock.now();
        let reservation = Reservation {
            id: ReservationId::new(),
            raffle_id: request.raffle_id,
            user_id: request.user_id,
            number_ids: request.number_ids.clone(),
            session_id: request.session_id.clone(),
            total_amount,
            status: ReservationStatus::Pending,
            expires_at: add_duration(now, self.window),
            created_at: now,
            updated_at: now,
        };
        self.reservations.insert_reservation(&reservation).await?;

        if let Err(e) = self
            .raffles
            .mark_reserved(reservation.raffle_id, &reservation.number_ids, reservation.expires_at)
            .await
        {
            tracing::warn!(reservation_id = %reservation.id, error = %e, "Failed to mark numbers reserved");
        }

        Ok(reservation)
    }

    // ═══════════════════════════════════════════════════════════
    // Add number
    // ═══════════════════════════════════════════════════════════

    /// Add one number to a live pending reservation and recompute its total.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::ReservationExpired`] / [`RaffleError::InvalidTransition`] if the
    ///   reservation is not live
    /// - [`RaffleError::NumberAlreadyInReservation`] if it already holds the number
    /// - [`RaffleError::NumberAlreadyReserved`] if anyone else holds or owns it
    #[tracing::instrument(skip(self), fields(reservation_id = %id, number_id = %number_id))]
    pub async fn add_number(&self, id: ReservationId, number_id: NumberId) -> Result<Reservation> {
        let reservation = self.get(id).await?;
        let now = self.clock.now();
        ensure_live(&reservation, now)?;
        if reservation.contains(number_id) {
            return Err(RaffleError::NumberAlreadyInReservation(number_id));
        }

        let raffle = self
            .raffles
            .get_raffle(reservation.raffle_id)
            .await?
            .ok_or_else(|| RaffleError::not_found("raffle", reservation.raffle_id))?;
        if !raffle.is_active() {
            return Err(RaffleError::RaffleNotActive);
        }
        if !self
            .raffles
            .unavailable_numbers(reservation.raffle_id, &[number_id])
            .await?
            .is_empty()
        {
            return Err(RaffleError::NumberAlreadyReserved(number_id));
        }

        let unit_price = reservation
            .unit_price()
            .ok_or_else(|| RaffleError::Internal(format!("reservation {id} has no numbers")))?;
        let new_total = reservation
            .total_amount
            .checked_add(unit_price)
            .ok_or_else(|| RaffleError::InvalidAmount("total overflows".to_string()))?;

        // The new lock lives as long as the rest of the reservation.
        let remaining = (reservation.expires_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .min(self.lock_ttl)
            .max(Duration::from_secs(1));
        let key = LockKey::new(reservation.raffle_id, number_id);
        let lock = match self.locks.acquire(key, remaining).await? {
            Acquisition::Acquired(lock) => lock,
            Acquisition::AlreadyHeld(_) => {
                metrics::counter!("raffle_lock_conflicts_total").increment(1);
                return Err(RaffleError::NumberAlreadyReserved(number_id));
            }
        };

        let appended = async {
            if self
                .reservations
                .count_overlapping(reservation.raffle_id, &[number_id])
                .await?
                > 0
            {
                return Err(RaffleError::NumberAlreadyReserved(number_id));
            }
            if !self
                .reservations
                .append_number(id, number_id, new_total, now)
                .await?
            {
                return Err(RaffleError::InvalidTransition(
                    "reservation changed while adding a number".to_string(),
                ));
            }
            Ok(())
        }
        .await;

        if let Err(e) = appended {
            if let Err(release_err) = self.locks.release(&lock).await {
                tracing::warn!(error = %release_err, "Failed to release lock after failed add");
            }
            return Err(e);
        }

        if let Err(e) = self
            .raffles
            .mark_reserved(reservation.raffle_id, &[number_id], reservation.expires_at)
            .await
        {
            tracing::warn!(error = %e, "Failed to mark number reserved");
        }

        self.publisher.publish(LiveEvent::NumberReserved {
            raffle_id: reservation.raffle_id,
            reservation_id: id,
            number_id,
            user_id: reservation.user_id,
        });
        tracing::info!(total = %new_total, "Number added to reservation");

        self.get(id).await
    }

    // ═══════════════════════════════════════════════════════════
    // Confirm
    // ═══════════════════════════════════════════════════════════

    /// Confirm a live pending reservation.
    ///
    /// Confirming an already confirmed reservation returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::ReservationExpired`] if the window elapsed or it was expired
    /// - [`RaffleError::InvalidTransition`] if it was cancelled
    pub async fn confirm(&self, id: ReservationId) -> Result<Reservation> {
        let reservation = self.get(id).await?;
        if reservation.status == ReservationStatus::Confirmed {
            return Ok(reservation);
        }
        ensure_live(&reservation, self.clock.now())?;
        self.confirm_pending(reservation).await
    }

    /// Confirm a pending reservation because its payment succeeded.
    ///
    /// Unlike [`Self::confirm`] this accepts a reservation whose window elapsed but
    /// that the sweeper has not expired yet: the buyer paid inside the window the
    /// provider saw.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::ReservationExpired`] if the reservation was already expired
    /// - [`RaffleError::InvalidTransition`] if it was cancelled
    pub async fn confirm_paid(&self, id: ReservationId) -> Result<Reservation> {
        let reservation = self.get(id).await?;
        match reservation.status {
            ReservationStatus::Confirmed => Ok(reservation),
            ReservationStatus::Pending => self.confirm_pending(reservation).await,
            ReservationStatus::Expired => Err(RaffleError::ReservationExpired),
            ReservationStatus::Cancelled => Err(RaffleError::InvalidTransition(
                "reservation was cancelled".to_string(),
            )),
        }
    }

    #[tracing::instrument(skip(self, reservation), fields(reservation_id = %reservation.id))]
    async fn confirm_pending(&self, reservation: Reservation) -> Result<Reservation> {
        let now = self.clock.now();
        if !self
            .reservations
            .confirm_reservation(&reservation, now)
            .await?
        {
            // Lost a race; report whatever the winner did.
            let current = self.get(reservation.id).await?;
            return match current.status {
                ReservationStatus::Confirmed => Ok(current),
                ReservationStatus::Expired => Err(RaffleError::ReservationExpired),
                ReservationStatus::Cancelled | ReservationStatus::Pending => Err(
                    RaffleError::InvalidTransition(format!(
                        "cannot confirm a {} reservation",
                        current.status.as_str()
                    )),
                ),
            };
        }

        let confirmed = Reservation {
            status: ReservationStatus::Confirmed,
            updated_at: now,
            ..reservation
        };

        metrics::counter!("raffle_reservations_confirmed_total").increment(1);
        tracing::info!(numbers = confirmed.number_ids.len(), "Reservation confirmed");
        self.publisher.publish(LiveEvent::NumbersSold {
            raffle_id: confirmed.raffle_id,
            reservation_id: confirmed.id,
            number_ids: confirmed.number_ids.clone(),
            user_id: confirmed.user_id,
        });

        Ok(confirmed)
    }

    // ═══════════════════════════════════════════════════════════
    // Cancel / expire
    // ═══════════════════════════════════════════════════════════

    /// Cancel a pending reservation and release its numbers.
    ///
    /// Cancelling an already cancelled reservation returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::AlreadyConfirmed`] if it was confirmed
    /// - [`RaffleError::ReservationExpired`] if it already expired
    pub async fn cancel(&self, id: ReservationId) -> Result<Reservation> {
        self.release(id, ReleaseReason::Cancelled).await
    }

    /// Expire a pending reservation whose window elapsed and release its numbers.
    ///
    /// Expiring an already expired reservation returns it unchanged.
    ///
    /// # Errors
    ///
    /// - [`RaffleError::AlreadyConfirmed`] if it was confirmed
    /// - [`RaffleError::InvalidTransition`] if it was cancelled or is still inside its window
    pub async fn expire(&self, id: ReservationId) -> Result<Reservation> {
        self.release(id, ReleaseReason::Expired).await
    }

    #[tracing::instrument(skip(self), fields(reservation_id = %id, reason = ?reason))]
    async fn release(&self, id: ReservationId, reason: ReleaseReason) -> Result<Reservation> {
        let target = match reason {
            ReleaseReason::Cancelled => ReservationStatus::Cancelled,
            ReleaseReason::Expired => ReservationStatus::Expired,
        };

        // One retry covers a status change that lands between read and write.
        for _ in 0..2 {
            let reservation = self.get(id).await?;
            if reservation.status == target {
                return Ok(reservation);
            }
            match reservation.status {
                ReservationStatus::Confirmed => return Err(RaffleError::AlreadyConfirmed),
                ReservationStatus::Expired => return Err(RaffleError::ReservationExpired),
                ReservationStatus::Cancelled => {
                    return Err(RaffleError::InvalidTransition(
                        "reservation was cancelled".to_string(),
                    ));
                }
                ReservationStatus::Pending => {}
            }

            let now = self.clock.now();
            if reason == ReleaseReason::Expired && !reservation.is_past_window(now) {
                return Err(RaffleError::InvalidTransition(
                    "reservation window has not elapsed".to_string(),
                ));
            }

            if self
                .reservations
                .transition_reservation(id, ReservationStatus::Pending, target, now)
                .await?
            {
                self.release_numbers(&reservation, reason).await;
                return Ok(Reservation {
                    status: target,
                    updated_at: now,
                    ..reservation
                });
            }
        }

        Err(RaffleError::InvalidTransition(format!(
            "reservation {id} changed concurrently"
        )))
    }

    async fn release_numbers(&self, reservation: &Reservation, reason: ReleaseReason) {
        for number_id in &reservation.number_ids {
            let key = LockKey::new(reservation.raffle_id, *number_id);
            if let Err(e) = self.locks.force_release(key).await {
                // The TTL still frees the number on its own.
                tracing::warn!(lock = %key, error = %e, "Failed to release lock");
            }
        }
        if let Err(e) = self
            .raffles
            .clear_reserved(reservation.raffle_id, &reservation.number_ids)
            .await
        {
            tracing::warn!(error = %e, "Failed to clear reserved markers");
        }

        match reason {
            ReleaseReason::Cancelled => {
                metrics::counter!("raffle_reservations_cancelled_total").increment(1);
                tracing::info!("Reservation cancelled");
            }
            ReleaseReason::Expired => {
                metrics::counter!("raffle_reservations_expired_total").increment(1);
                tracing::info!("Reservation expired");
            }
        }

        self.publisher.publish(LiveEvent::NumbersReleased {
            raffle_id: reservation.raffle_id,
            reservation_id: reservation.id,
            number_ids: reservation.number_ids.clone(),
            reason,
        });
    }

    // ═══════════════════════════════════════════════════════════
    // Maintenance
    // ═══════════════════════════════════════════════════════════

    /// Pending reservations past their window, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_overdue(&self, limit: usize) -> Result<Vec<Reservation>> {
        self.reservations
            .list_overdue(self.clock.now(), limit)
            .await
    }

    /// Re-apply number ownership for confirmed reservations whose owner write was lost.
    ///
    /// Returns how many numbers were repaired.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn repair_owners(&self, limit: usize) -> Result<u64> {
        let mut repaired = 0;
        for reservation in self.reservations.list_unowned_confirmed(limit).await? {
            let updated = self.reservations.assign_owners(&reservation).await?;
            if updated > 0 {
                tracing::warn!(
                    reservation_id = %reservation.id,
                    numbers = updated,
                    "Repaired number ownership for confirmed reservation"
                );
            }
            repaired += updated;
        }
        Ok(repaired)
    }
}

fn validate_request(request: &CreateReservation) -> Result<()> {
    if request.number_ids.is_empty() {
        return Err(RaffleError::NoNumbersSelected);
    }
    if request.session_id.trim().is_empty() {
        return Err(RaffleError::InvalidInput("session_id is required".to_string()));
    }
    let mut seen = HashSet::with_capacity(request.number_ids.len());
    if let Some(duplicate) = request.number_ids.iter().find(|n| !seen.insert(**n)) {
        return Err(RaffleError::InvalidInput(format!(
            "number {duplicate} is listed more than once"
        )));
    }
    Ok(())
}

fn ensure_live(reservation: &Reservation, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
    match reservation.status {
        ReservationStatus::Pending if reservation.is_past_window(now) => {
            Err(RaffleError::ReservationExpired)
        }
        ReservationStatus::Pending => Ok(()),
        ReservationStatus::Expired => Err(RaffleError::ReservationExpired),
        ReservationStatus::Confirmed => Err(RaffleError::AlreadyConfirmed),
        ReservationStatus::Cancelled => Err(RaffleError::InvalidTransition(
            "reservation was cancelled".to_string(),
        )),
    }
}
