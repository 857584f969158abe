//! In-memory system of record implementing every repository contract.

use crate::error::{RaffleError, Result};
use crate::repository::{
    IdempotencyOutcome, IdempotencyRepository, PaymentRepository, RaffleRepository,
    ReservationRepository,
};
use crate::types::{
    IdempotencyRecord, Money, NumberId, Payment, PaymentId, PaymentStatus, PaymentUpdate, Raffle,
    RaffleId, RaffleStatus, Reservation, ReservationId, ReservationStatus, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
struct NumberRow {
    owner: Option<UserId>,
    reserved_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    raffles: HashMap<RaffleId, Raffle>,
    numbers: HashMap<(RaffleId, NumberId), NumberRow>,
    // Insertion order doubles as creation order for "newest first" listings.
    reservations: Vec<Reservation>,
    payments: Vec<Payment>,
    idempotency: HashMap<(String, UserId), IdempotencyRecord>,
    failing: bool,
}

/// Mock store.
///
/// All repositories share one mutex, which makes every multi-row operation (such as
/// confirmation with its owner writes) atomic, like a database transaction.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.guard();
        if state.failing {
            return Err(RaffleError::Database("injected database failure".to_string()));
        }
        Ok(state)
    }

    /// Seed a raffle with numbers `1..=total_numbers`.
    pub fn add_raffle(
        &self,
        title: &str,
        status: RaffleStatus,
        price_per_number: Money,
        total_numbers: i32,
    ) -> RaffleId {
        let id = RaffleId::new();
        let mut state = self.guard();
        state.raffles.insert(
            id,
            Raffle {
                id,
                title: title.to_string(),
                status,
                price_per_number,
                total_numbers,
                sold_count: 0,
            },
        );
        for n in 1..=total_numbers {
            state
                .numbers
                .insert((id, NumberId::new(n)), NumberRow::default());
        }
        id
    }

    /// Make every repository call fail with [`RaffleError::Database`] until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.guard().failing = failing;
    }

    /// Owner recorded on a number.
    #[must_use]
    pub fn owner_of(&self, raffle_id: RaffleId, number_id: NumberId) -> Option<UserId> {
        self.guard()
            .numbers
            .get(&(raffle_id, number_id))
            .and_then(|row| row.owner)
    }

    /// Hold marker recorded on a number.
    #[must_use]
    pub fn reserved_until(&self, raffle_id: RaffleId, number_id: NumberId) -> Option<DateTime<Utc>> {
        self.guard()
            .numbers
            .get(&(raffle_id, number_id))
            .and_then(|row| row.reserved_until)
    }

    /// Erase a number's owner, simulating a lost owner write.
    pub fn clear_owner(&self, raffle_id: RaffleId, number_id: NumberId) {
        if let Some(row) = self.guard().numbers.get_mut(&(raffle_id, number_id)) {
            row.owner = None;
        }
    }

    /// Raffle's sold counter.
    #[must_use]
    pub fn raffle_sold_count(&self, raffle_id: RaffleId) -> i32 {
        self.guard()
            .raffles
            .get(&raffle_id)
            .map_or(0, |r| r.sold_count)
    }

    /// Number of stored reservations.
    #[must_use]
    pub fn reservation_count(&self) -> usize {
        self.guard().reservations.len()
    }

    /// Number of stored payments.
    #[must_use]
    pub fn payment_count(&self) -> usize {
        self.guard().payments.len()
    }

    /// Number of stored idempotency rows.
    #[must_use]
    pub fn idempotency_count(&self) -> usize {
        self.guard().idempotency.len()
    }

    /// Overwrite a stored reservation (test setup for unusual states).
    pub fn put_reservation(&self, reservation: Reservation) {
        let mut state = self.guard();
        if let Some(existing) = state
            .reservations
            .iter_mut()
            .find(|r| r.id == reservation.id)
        {
            *existing = reservation;
        } else {
            state.reservations.push(reservation);
        }
    }
}

fn find_reservation(state: &mut State, id: ReservationId) -> Option<&mut Reservation> {
    state.reservations.iter_mut().find(|r| r.id == id)
}

#[async_trait]
impl RaffleRepository for InMemoryStore {
    async fn get_raffle(&self, id: RaffleId) -> Result<Option<Raffle>> {
        Ok(self.state()?.raffles.get(&id).cloned())
    }

    async fn unavailable_numbers(
        &self,
        raffle_id: RaffleId,
        numbers: &[NumberId],
    ) -> Result<Vec<NumberId>> {
        let state = self.state()?;
        Ok(numbers
            .iter()
            .copied()
            .filter(|n| {
                state
                    .numbers
                    .get(&(raffle_id, *n))
                    .is_none_or(|row| row.owner.is_some())
            })
            .collect())
    }

    async fn mark_reserved(
        &self,
        raffle_id: RaffleId,
        numbers: &[NumberId],
        until: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state()?;
        for n in numbers {
            if let Some(row) = state.numbers.get_mut(&(raffle_id, *n)) {
                row.reserved_until = Some(until);
            }
        }
        Ok(())
    }

    async fn clear_reserved(&self, raffle_id: RaffleId, numbers: &[NumberId]) -> Result<()> {
        let mut state = self.state()?;
        for n in numbers {
            if let Some(row) = state.numbers.get_mut(&(raffle_id, *n)) {
                row.reserved_until = None;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationRepository for InMemoryStore {
    async fn insert_reservation(&self, reservation: &Reservation) -> Result<()> {
        let mut state = self.state()?;
        if state.reservations.iter().any(|r| r.id == reservation.id) {
            return Err(RaffleError::Database(format!(
                "duplicate reservation id {}",
                reservation.id
            )));
        }
        state.reservations.push(reservation.clone());
        Ok(())
    }

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>> {
        Ok(self
            .state()?
            .reservations
            .iter()
            .find(|r| r.id == id)
            .cloned())
    }

    async fn find_by_session(
        &self,
        user_id: UserId,
        session_id: &str,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .state()?
            .reservations
            .iter()
            .rev()
            .find(|r| r.user_id == user_id && r.session_id == session_id)
            .cloned())
    }

    async fn list_reservations_by_user(&self, user_id: UserId) -> Result<Vec<Reservation>> {
        Ok(self
            .state()?
            .reservations
            .iter()
            .rev()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn find_active(
        &self,
        user_id: UserId,
        raffle_id: RaffleId,
        now: DateTime<Utc>,
    ) -> Result<Option<Reservation>> {
        Ok(self
            .state()?
            .reservations
            .iter()
            .rev()
            .find(|r| r.user_id == user_id && r.raffle_id == raffle_id && r.is_live(now))
            .cloned())
    }

    async fn count_overlapping(&self, raffle_id: RaffleId, numbers: &[NumberId]) -> Result<u64> {
        let count = self
            .state()?
            .reservations
            .iter()
            .filter(|r| {
                r.raffle_id == raffle_id
                    && r.status.holds_numbers()
                    && r.number_ids.iter().any(|n| numbers.contains(n))
            })
            .count();
        Ok(count as u64)
    }

    async fn transition_reservation(
        &self,
        id: ReservationId,
        from: ReservationStatus,
        to: ReservationStatus,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state()?;
        match find_reservation(&mut state, id) {
            Some(r) if r.status == from => {
                r.status = to;
                r.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn confirm_reservation(&self, reservation: &Reservation, now: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state()?;
        let Some(stored) = find_reservation(&mut state, reservation.id) else {
            return Ok(false);
        };
        if stored.status != ReservationStatus::Pending {
            return Ok(false);
        }
        stored.status = ReservationStatus::Confirmed;
        stored.updated_at = now;
        let (raffle_id, user_id, numbers) =
            (stored.raffle_id, stored.user_id, stored.number_ids.clone());

        for n in &numbers {
            if let Some(row) = state.numbers.get_mut(&(raffle_id, *n)) {
                row.owner = Some(user_id);
                row.reserved_until = None;
            }
        }
        if let Some(raffle) = state.raffles.get_mut(&raffle_id) {
            raffle.sold_count += i32::try_from(numbers.len()).unwrap_or(i32::MAX);
        }
        Ok(true)
    }

    async fn append_number(
        &self,
        id: ReservationId,
        number: NumberId,
        new_total: Money,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state()?;
        match find_reservation(&mut state, id) {
            Some(r) if r.status == ReservationStatus::Pending && !r.contains(number) => {
                r.number_ids.push(number);
                r.total_amount = new_total;
                r.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_overdue(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Reservation>> {
        let state = self.state()?;
        let mut overdue: Vec<Reservation> = state
            .reservations
            .iter()
            .filter(|r| r.status == ReservationStatus::Pending && r.expires_at < now)
            .cloned()
            .collect();
        overdue.sort_by_key(|r| r.expires_at);
        overdue.truncate(limit);
        Ok(overdue)
    }

    async fn list_unowned_confirmed(&self, limit: usize) -> Result<Vec<Reservation>> {
        let state = self.state()?;
        Ok(state
            .reservations
            .iter()
            .filter(|r| {
                r.status == ReservationStatus::Confirmed
                    && r.number_ids.iter().any(|n| {
                        state
                            .numbers
                            .get(&(r.raffle_id, *n))
                            .is_some_and(|row| row.owner.is_none())
                    })
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn assign_owners(&self, reservation: &Reservation) -> Result<u64> {
        let mut state = self.state()?;
        let mut updated = 0;
        for n in &reservation.number_ids {
            if let Some(row) = state.numbers.get_mut(&(reservation.raffle_id, *n)) {
                if row.owner.is_none() {
                    row.owner = Some(reservation.user_id);
                    row.reserved_until = None;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl PaymentRepository for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<bool> {
        let mut state = self.state()?;
        if state.payments.iter().any(|p| {
            p.reservation_id == payment.reservation_id
                || p.provider_intent_id == payment.provider_intent_id
        }) {
            return Ok(false);
        }
        state.payments.push(payment.clone());
        Ok(true)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.state()?.payments.iter().find(|p| p.id == id).cloned())
    }

    async fn find_payment_by_reservation(
        &self,
        reservation_id: ReservationId,
    ) -> Result<Option<Payment>> {
        Ok(self
            .state()?
            .payments
            .iter()
            .find(|p| p.reservation_id == reservation_id)
            .cloned())
    }

    async fn find_payment_by_intent(&self, provider_intent_id: &str) -> Result<Option<Payment>> {
        Ok(self
            .state()?
            .payments
            .iter()
            .find(|p| p.provider_intent_id == provider_intent_id)
            .cloned())
    }

    async fn list_payments_by_user(&self, user_id: UserId) -> Result<Vec<Payment>> {
        Ok(self
            .state()?
            .payments
            .iter()
            .rev()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update_payment(
        &self,
        id: PaymentId,
        from: &[PaymentStatus],
        update: &PaymentUpdate,
    ) -> Result<bool> {
        let mut state = self.state()?;
        match state.payments.iter_mut().find(|p| p.id == id) {
            Some(payment) if from.contains(&payment.status) => {
                update.apply_to(payment);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl IdempotencyRepository for InMemoryStore {
    async fn get_record(&self, key: &str, user_id: UserId) -> Result<Option<IdempotencyRecord>> {
        Ok(self
            .state()?
            .idempotency
            .get(&(key.to_string(), user_id))
            .cloned())
    }

    async fn try_begin(&self, record: &IdempotencyRecord) -> Result<bool> {
        let mut state = self.state()?;
        let slot = (record.key.clone(), record.user_id);
        if state.idempotency.contains_key(&slot) {
            return Ok(false);
        }
        state.idempotency.insert(slot, record.clone());
        Ok(true)
    }

    async fn finish(
        &self,
        key: &str,
        user_id: UserId,
        outcome: IdempotencyOutcome<'_>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state()?;
        if let Some(record) = state.idempotency.get_mut(&(key.to_string(), user_id)) {
            record.status = outcome.status;
            record.response_status = Some(outcome.response_status);
            record.response_body = Some(outcome.response_body.to_string());
            record.completed_at = Some(now);
        }
        Ok(())
    }

    async fn delete_record(&self, key: &str, user_id: UserId) -> Result<()> {
        self.state()?.idempotency.remove(&(key.to_string(), user_id));
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state()?;
        let before = state.idempotency.len();
        state.idempotency.retain(|_, record| !record.is_expired(now));
        Ok((before - state.idempotency.len()) as u64)
    }
}
