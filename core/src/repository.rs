//! Persistence contracts for the system of record.
//!
//! Every status change goes through a guarded operation (`expected status → new
//! status`) that reports whether it applied, so concurrent writers never silently
//! overwrite each other. Implementations live in `raffle-postgres` and, for tests,
//! in [`crate::mocks`].

use crate::error::Result;
use crate::types::{
    IdempotencyRecord, Money, NumberId, Payment, PaymentId, PaymentStatus, PaymentUpdate, Raffle,
    RaffleId, Reservation, ReservationId, ReservationStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read access to raffles and bookkeeping on their numbers.
#[async_trait]
pub trait RaffleRepository: Send + Sync {
    /// Load a raffle.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn get_raffle(&self, id: RaffleId) -> Result<Option<Raffle>>;

    /// Numbers among `numbers` that do not exist in the raffle or already have an owner.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn unavailable_numbers(
        &self,
        raffle_id: RaffleId,
        numbers: &[NumberId],
    ) -> Result<Vec<NumberId>>;

    /// Record that `numbers` are held until `until`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn mark_reserved(
        &self,
        raffle_id: RaffleId,
        numbers: &[NumberId],
        until: DateTime<Utc>,
    ) -> Result<()>;

    /// Clear the hold marker on `numbers`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn clear_reserved(&self, raffle_id: RaffleId, numbers: &[NumberId]) -> Result<()>;
}

/// Reservations and their guarded transitions.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Insert a new pending reservation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()>;

    /// Load a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>>;

    /// The reservation a user created with `session_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn find_by_session(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> Result<Option<Reservation>>;

    /// All reservations of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn list_reservations_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>>;

    /// The user's most recent pending reservation in a raffle whose window is still open.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn find_active(
        &self,
        user_id: UserId,
        raffle_id: RaffleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>>;

    /// Count pending or confirmed reservations of the raffle that contain any of `numbers`.
    ///
    /// Pending reservations count even after their window elapsed: they keep the
    /// numbers until the sweeper moves them to `expired`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn count_overlapping(&self, raffle_id: RaffleId, numbers: &[NumberId]) -> Result<u64>;

    /// Move `id` from `from` to `to`; `false` when the stored status was not `from`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Atomically move a pending reservation to `confirmed`, assign its numbers to
    /// the buyer, clear their hold markers, and bump the raffle's sold count.
    ///
    /// Returns `false` (and writes nothing) when the stored status was not `pending`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn confirm_reservation(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<bool>;

    /// Append `number` to a pending reservation and set its new total.
    ///
    /// Returns `false` when the reservation is no longer pending or already holds the number.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn append_number(
        &self,
        id: ReservationId,
        number: NumberId,
        new_total: Money,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Pending reservations whose window ended before `now`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn list_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>>;

    /// Confirmed reservations with at least one number that has no owner recorded.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn list_unowned_confirmed(&self, limit: usize) -> Result<Vec<Reservation>>;

    /// Assign the reservation's numbers to its buyer where they are still unowned.
    ///
    /// Returns how many numbers were updated.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn assign_owners(&self, reservation: &Reservation) -> Result<u64>;
}

/// Payments, one per reservation.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Insert a payment; `false` when the reservation already has one.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn insert_payment(&self, payment: &Payment) -> Result<bool>;

    /// Load a payment.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// The payment of a reservation.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn find_payment_by_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Payment>>;

    /// The payment backed by a provider intent.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn find_payment_by_intent(&self, provider_intent_id: &str) -> Result<Option<Payment>>;

    /// All payments of a user, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>>;

    /// Apply `update` when the stored status is one of `from`; reports whether it applied.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn update_payment(
        &self,
        id: PaymentId,
        from: &[PaymentStatus],
        update: &PaymentUpdate,
    ) -> Result<bool>;
}

/// Idempotency rows scoped by `(key, user_id)`.
#[async_trait]
pub trait IdempotencyRepository: Send + Sync {
    /// Load a row.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn get_record(&self, key: &str, user_id: UserId) -> Result<Option<IdempotencyRecord>>;

    /// Insert a `processing` row; `false` when a row for the key already exists.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn try_begin(&self, record: &IdempotencyRecord) -> Result<bool>;

    /// Record the outcome of the request and move the row to `status`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn finish(
        &self,
        key: &str,
        user_id: UserId,
        outcome: IdempotencyOutcome<'_>,
        now: DateTime<Utc>,
    ) -> Result<()>;

    /// Remove a row so the key can be used again.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn delete_record(&self, key: &str, user_id: UserId) -> Result<()>;

    /// Delete rows whose retention ended before `now`; returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::RaffleError::Database`] if the store fails.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

/// Outcome written to an idempotency row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyOutcome<'a> {
    /// `completed` or `failed`
    pub status: crate::types::IdempotencyStatus,
    /// Response status code
    pub response_status: u16,
    /// Response body (JSON)
    pub response_body: &'a str,
}
