//! Row decoding and error mapping shared by the repositories.

use raffle_core::error::{RaffleError, Result};
use raffle_core::types::{
    IdempotencyRecord, IdempotencyStatus, Money, NumberId, Payment, PaymentId, PaymentStatus,
    Raffle, RaffleId, RaffleStatus, Reservation, ReservationId, ReservationStatus, UserId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

pub(crate) const RESERVATION_COLUMNS: &str = "id, raffle_id, user_id, number_ids, session_id, \
     total_amount, status, expires_at, created_at, updated_at";

pub(crate) const PAYMENT_COLUMNS: &str = "id, reservation_id, user_id, raffle_id, \
     provider_intent_id, client_secret, amount, currency, status, payment_method, \
     error_message, metadata, created_at, updated_at, paid_at";

pub(crate) const IDEMPOTENCY_COLUMNS: &str = "key, user_id, request_path, request_params, \
     request_hash, response_status, response_body, status, created_at, completed_at, expires_at";

/// Connection-level failures are transient; everything else is a database error.
pub(crate) fn db_error(err: sqlx::Error) -> RaffleError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RaffleError::StoreUnavailable(err.to_string())
        }
        other => RaffleError::Database(other.to_string()),
    }
}

pub(crate) fn numbers_param(numbers: &[NumberId]) -> Vec<i32> {
    numbers.iter().map(NumberId::value).collect()
}

#[allow(clippy::cast_possible_wrap)] // batch sizes are small
pub(crate) const fn limit_param(limit: usize) -> i64 {
    limit as i64
}

pub(crate) fn raffle_from_row(row: &PgRow) -> Result<Raffle> {
    let status: String = row.try_get("status").map_err(db_error)?;
    Ok(Raffle {
        id: RaffleId::from_uuid(row.try_get("id").map_err(db_error)?),
        title: row.try_get("title").map_err(db_error)?,
        status: RaffleStatus::parse(&status)?,
        price_per_number: Money::from_cents(row.try_get("price_per_number").map_err(db_error)?),
        total_numbers: row.try_get("total_numbers").map_err(db_error)?,
        sold_count: row.try_get("sold_count").map_err(db_error)?,
    })
}

pub(crate) fn reservation_from_row(row: &PgRow) -> Result<Reservation> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let numbers: Vec<i32> = row.try_get("number_ids").map_err(db_error)?;
    Ok(Reservation {
        id: ReservationId::from_uuid(row.try_get("id").map_err(db_error)?),
        raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(db_error)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(db_error)?),
        number_ids: numbers.into_iter().map(NumberId::new).collect(),
        session_id: row.try_get("session_id").map_err(db_error)?,
        total_amount: Money::from_cents(row.try_get("total_amount").map_err(db_error)?),
        status: ReservationStatus::parse(&status)?,
        expires_at: row.try_get("expires_at").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
    })
}

pub(crate) fn payment_from_row(row: &PgRow) -> Result<Payment> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let metadata: serde_json::Value = row.try_get("metadata").map_err(db_error)?;
    Ok(Payment {
        id: PaymentId::from_uuid(row.try_get("id").map_err(db_error)?),
        reservation_id: ReservationId::from_uuid(row.try_get("reservation_id").map_err(db_error)?),
        user_id: UserId::from_uuid(row.try_get("user_id").map_err(db_error)?),
        raffle_id: RaffleId::from_uuid(row.try_get("raffle_id").map_err(db_error)?),
        provider_intent_id: row.try_get("provider_intent_id").map_err(db_error)?,
        client_secret: row.try_get("client_secret").map_err(db_error)?,
        amount: Money::from_cents(row.try_get("amount").map_err(db_error)?),
        currency: row.try_get("currency").map_err(db_error)?,
        status: PaymentStatus::parse(&status)?,
        payment_method: row.try_get("payment_method").map_err(db_error)?,
        error_message: row.try_get("error_message").map_err(db_error)?,
        metadata: serde_json::from_value(metadata)
            .map_err(|e| RaffleError::Database(format!("invalid payment metadata: {e}")))?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
        paid_at: row.try_get("paid_at").map_err(db_error)?,
    })
}

pub(crate) fn record_from_row(row: &PgRow) -> Result<IdempotencyRecord> {
    let status: String = row.try_get("status").map_err(db_error)?;
    let response_status: Option<i32> = row.try_get("response_status").map_err(db_error)?;
    let user_id: Uuid = row.try_get("user_id").map_err(db_error)?;
    Ok(IdempotencyRecord {
        key: row.try_get("key").map_err(db_error)?,
        user_id: UserId::from_uuid(user_id),
        request_path: row.try_get("request_path").map_err(db_error)?,
        request_params: row.try_get("request_params").map_err(db_error)?,
        request_hash: row.try_get("request_hash").map_err(db_error)?,
        response_status: response_status.and_then(|s| u16::try_from(s).ok()),
        response_body: row.try_get("response_body").map_err(db_error)?,
        status: IdempotencyStatus::parse(&status)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        completed_at: row.try_get("completed_at").map_err(db_error)?,
        expires_at: row.try_get("expires_at").map_err(db_error)?,
    })
}
