//! Reservation endpoints.
//!
//! - `POST /reservations`: hold numbers for the caller
//! - `GET /reservations`: the caller's reservations, newest first
//! - `GET /reservations/:id`: one reservation (owner only)
//! - `POST /reservations/:id/cancel`: release a pending reservation
//! - `POST /reservations/:id/confirm`: confirm after a succeeded payment
//! - `POST /reservations/:id/add-number`: grow a pending reservation
//! - `GET /raffles/:id/my-reservation`: the caller's live reservation, or `null`

use crate::error::AppError;
use crate::extractors::AuthUser;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use raffle_core::reservation::CreateReservation;
use raffle_core::types::{NumberId, RaffleId, Reservation, ReservationId};
use serde::{Deserialize, Serialize};

/// Request to create a reservation.
#[derive(Debug, Deserialize)]
pub struct CreateReservationBody {
    /// Raffle to reserve in
    pub raffle_id: RaffleId,
    /// Numbers to hold
    pub number_ids: Vec<NumberId>,
    /// Client-generated key; retries with the same key return the same reservation
    pub session_id: String,
}

/// Request to add one number.
#[derive(Debug, Deserialize)]
pub struct AddNumberBody {
    /// Number to add
    pub number_id: NumberId,
}

/// `{data: ...}` wrapper used where the payload may be absent.
#[derive(Debug, Serialize)]
pub struct DataEnvelope<T> {
    /// Payload, `null` when absent
    pub data: Option<T>,
}

/// `POST /reservations`
///
/// # Errors
///
/// 400 for invalid input, 404 for an unknown raffle, 409 when numbers are taken or the
/// raffle is closed, 503 when the lock store is down.
pub async fn create(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    body: Result<Json<CreateReservationBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let Json(body) = body?;
    let reservation = state
        .engine
        .create(CreateReservation {
            raffle_id: body.raffle_id,
            user_id,
            number_ids: body.number_ids,
            session_id: body.session_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// `GET /reservations`
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn list(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<Vec<Reservation>>, AppError> {
    Ok(Json(state.engine.list_for_user(user_id).await?))
}

/// `GET /reservations/:id`
///
/// # Errors
///
/// 404 when unknown, 403 when owned by someone else.
pub async fn get(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<ReservationId>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.engine.get_owned(id, user_id).await?))
}

/// `POST /reservations/:id/cancel`
///
/// # Errors
///
/// 404/403 as for `get`; 409 `ALREADY_CONFIRMED` once paid.
pub async fn cancel(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<ReservationId>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.payments.cancel_by_user(id, user_id).await?))
}

/// `POST /reservations/:id/confirm`
///
/// # Errors
///
/// 400 `PAYMENT_NOT_COMPLETED` without a succeeded payment, 400 `RESERVATION_EXPIRED`
/// after the window, 409 on an amount mismatch.
pub async fn confirm(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<ReservationId>,
) -> Result<Json<Reservation>, AppError> {
    Ok(Json(state.payments.confirm_paid_by_user(id, user_id).await?))
}

/// `POST /reservations/:id/add-number`
///
/// # Errors
///
/// 409 `NUMBER_ALREADY_IN_RESERVATION` / `NUMBER_ALREADY_RESERVED`, 400 after expiry.
pub async fn add_number(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<ReservationId>,
    body: Result<Json<AddNumberBody>, JsonRejection>,
) -> Result<Json<Reservation>, AppError> {
    let Json(body) = body?;
    state.engine.get_owned(id, user_id).await?;
    Ok(Json(state.engine.add_number(id, body.number_id).await?))
}

/// `GET /raffles/:id/my-reservation`
///
/// # Errors
///
/// Returns an error if the store fails.
pub async fn my_reservation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(raffle_id): Path<RaffleId>,
) -> Result<Json<DataEnvelope<Reservation>>, AppError> {
    let data = state.engine.get_active(user_id, raffle_id).await?;
    Ok(Json(DataEnvelope { data }))
}
